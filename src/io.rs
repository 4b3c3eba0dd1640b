/*!
# I/O Utilities for Exporting Stored Sample Data

Functions to export an accumulator's stored data (interleaved, `n × nobs`)
as CSV, e.g. a full-trace accumulator's sample series for external
post-processing.
*/

use std::error::Error;
use std::fs::File;

use csv::Writer;

/**
Saves interleaved sample data as a CSV file.

The resulting file has a header row `"step", "obs_0", "obs_1", …` and one
row per stored step.

# Arguments

* `data` - Interleaved samples of shape `n × nobs`, row-major.
* `nobs` - Number of observable values per stored step.
* `filename` - The file path where the CSV data will be written.

# Examples

```rust
use mcintegral::io::save_csv;

let data = [1.0, 2.0, 3.0, 4.0]; // two steps of a two-valued observable
save_csv(&data, 2, "/tmp/mcintegral_doc_trace.csv").expect("saving data should succeed");
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv<T: std::fmt::Display>(
    data: &[T],
    nobs: usize,
    filename: &str,
) -> Result<(), Box<dyn Error>> {
    if nobs == 0 || data.len() % nobs != 0 {
        return Err(format!(
            "data of length {} does not factor into {} columns",
            data.len(),
            nobs
        )
        .into());
    }
    let mut wtr = Writer::from_writer(File::create(filename)?);

    let mut header: Vec<String> = vec!["step".to_string()];
    header.extend((0..nobs).map(|i| format!("obs_{}", i)));
    wtr.write_record(&header)?;

    for (step, row) in data.chunks(nobs).enumerate() {
        let mut record = vec![step.to_string()];
        record.extend(row.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_csv_rows_and_header() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let file = NamedTempFile::new().expect("Could not create temp file");
        let filename = file.path().to_str().unwrap();

        save_csv(&data, 2, filename).unwrap();

        let contents = fs::read_to_string(filename).unwrap();
        let expected = "\
step,obs_0,obs_1
0,1,2
1,3,4
2,5,6";
        assert_eq!(contents.trim(), expected);
    }

    #[test]
    fn test_save_csv_shape_mismatch() {
        let data = [1.0, 2.0, 3.0];
        let file = NamedTempFile::new().unwrap();
        assert!(save_csv(&data, 2, file.path().to_str().unwrap()).is_err());
    }
}
