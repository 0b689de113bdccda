//! CSV loading for return panels and price series.

use crate::error::{QuantoroError, Result};
use crate::types::ReturnMatrix;
use chrono::NaiveDate;
use std::path::Path;
use tracing::info;

/// Load a wide-format return panel from CSV.
///
/// The first column holds `%Y-%m-%d` dates; every remaining column is one
/// asset's periodic return. Rows must be in ascending date order and fully
/// populated.
pub fn load_returns_csv<P: AsRef<Path>>(path: P) -> Result<ReturnMatrix> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(QuantoroError::DataError(
            "Return CSV needs a date column and at least one asset column".to_string(),
        ));
    }
    let assets: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();

    let mut dates = Vec::new();
    let mut values = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(QuantoroError::DataError(format!(
                "Row {} has {} fields, expected {}",
                row + 1,
                record.len(),
                headers.len()
            )));
        }
        let date: NaiveDate = record[0].parse()?;
        dates.push(date);
        for field in record.iter().skip(1) {
            let value: f64 = field.trim().parse().map_err(|_| {
                QuantoroError::DataError(format!(
                    "Row {}: cannot parse return value '{}'",
                    row + 1,
                    field
                ))
            })?;
            values.push(value);
        }
    }

    let matrix = ReturnMatrix::new(dates, assets, values)?;
    info!(
        dates = matrix.n_dates(),
        assets = matrix.n_assets(),
        path = %path.as_ref().display(),
        "loaded return panel"
    );
    Ok(matrix)
}

/// Load a two-column (date, price) series from CSV, for regime detection.
pub fn load_price_series_csv<P: AsRef<Path>>(path: P) -> Result<(Vec<NaiveDate>, Vec<f64>)> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(QuantoroError::DataError(
            "Price CSV needs a date column and a price column".to_string(),
        ));
    }

    let mut dates = Vec::new();
    let mut prices = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let date: NaiveDate = record[0].parse()?;
        let price: f64 = record[1].trim().parse().map_err(|_| {
            QuantoroError::DataError(format!(
                "Row {}: cannot parse price '{}'",
                row + 1,
                &record[1]
            ))
        })?;
        dates.push(date);
        prices.push(price);
    }
    if dates.windows(2).any(|w| w[0] >= w[1]) {
        return Err(QuantoroError::DataError(
            "Price series dates must be strictly increasing".to_string(),
        ));
    }

    info!(
        observations = dates.len(),
        path = %path.as_ref().display(),
        "loaded price series"
    );
    Ok((dates, prices))
}

/// Convert a price series to simple periodic returns.
pub fn prices_to_returns(prices: &[f64]) -> Result<Vec<f64>> {
    if prices.len() < 2 {
        return Err(QuantoroError::InvalidInput(
            "Need at least 2 prices to compute returns".to_string(),
        ));
    }
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(QuantoroError::DataError(
            "Prices must be finite and positive".to_string(),
        ));
    }
    Ok(prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_returns_csv() {
        let file = write_csv(
            "date,AAA,BBB\n\
             2024-01-02,0.010,-0.005\n\
             2024-01-03,-0.002,0.012\n",
        );
        let matrix = load_returns_csv(file.path()).unwrap();
        assert_eq!(matrix.n_dates(), 2);
        assert_eq!(matrix.assets(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(matrix.row(0), &[0.010, -0.005]);
        assert_eq!(matrix.row(1), &[-0.002, 0.012]);
    }

    #[test]
    fn test_load_returns_rejects_bad_value() {
        let file = write_csv("date,AAA\n2024-01-02,abc\n");
        assert!(load_returns_csv(file.path()).is_err());
    }

    #[test]
    fn test_load_returns_rejects_bad_date() {
        let file = write_csv("date,AAA\n01/02/2024,0.01\n");
        assert!(load_returns_csv(file.path()).is_err());
    }

    #[test]
    fn test_load_returns_rejects_unsorted_dates() {
        let file = write_csv(
            "date,AAA\n\
             2024-01-03,0.01\n\
             2024-01-02,0.02\n",
        );
        assert!(load_returns_csv(file.path()).is_err());
    }

    #[test]
    fn test_load_price_series() {
        let file = write_csv(
            "date,close\n\
             2024-01-02,100.0\n\
             2024-01-03,101.5\n",
        );
        let (dates, prices) = load_price_series_csv(file.path()).unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(prices, vec![100.0, 101.5]);
    }

    #[test]
    fn test_prices_to_returns() {
        let returns = prices_to_returns(&[100.0, 110.0, 99.0]).unwrap();
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] - (-0.10)).abs() < 1e-12);
        assert!(prices_to_returns(&[100.0]).is_err());
        assert!(prices_to_returns(&[100.0, -5.0]).is_err());
    }
}
