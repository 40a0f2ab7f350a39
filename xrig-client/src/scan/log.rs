//! The scan log: one colon separated line per completed exposure
//!
//! ```text
//! rot_start:rot_end:exposure_time:file_name
//! 0.0000:10.0000:600:IMG_diffraction0001.tif
//! ```
use std::path::Path;

use tokio::{fs::File, io::AsyncWriteExt};

/// Positions of an axis at the start and end of an exposure
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionSpan {
    /// Position when the exposure was started
    pub start: f64,
    /// Position when the exposure completed
    pub end: f64,
}

/// The record of one completed exposure
#[derive(Clone, Debug, PartialEq)]
pub struct PointRecord {
    /// Linear index of the exposure
    pub index: u32,
    /// Axis 1 positions
    pub axis1: PositionSpan,
    /// Axis 2 positions, for two axis scans
    pub axis2: Option<PositionSpan>,
    /// Exposure time in seconds
    pub exposure_time: f64,
    /// Image file name
    pub file_name: String,
}

/// Build the header line for a scan over the named axes
pub fn format_header(axis1: &str, axis2: Option<&str>) -> String {
    let mut line = format!("{axis1}_start:{axis1}_end");
    if let Some(axis2) = axis2 {
        line.push_str(&format!(":{axis2}_start:{axis2}_end"));
    }
    line.push_str(":exposure_time:file_name");
    line
}

/// Build the log line for a completed exposure
pub fn format_row(record: &PointRecord) -> String {
    let mut line = format!("{:.4}:{:.4}", record.axis1.start, record.axis1.end);
    if let Some(axis2) = &record.axis2 {
        line.push_str(&format!(":{:.4}:{:.4}", axis2.start, axis2.end));
    }
    line.push_str(&format!(":{}:{}", record.exposure_time, record.file_name));
    line
}

/// An open scan log file
///
/// Every row is flushed as soon as it is written, so the file always holds exactly the completed
/// exposures.
#[derive(Debug)]
pub struct ScanLog {
    file: File,
    rows: usize,
}

impl ScanLog {
    /// Create (or truncate) the log file and write the header
    pub async fn create(
        path: impl AsRef<Path>,
        axis1: &str,
        axis2: Option<&str>,
    ) -> std::io::Result<Self> {
        let mut log = Self {
            file: File::create(path).await?,
            rows: 0,
        };
        log.write_line(&format_header(axis1, axis2)).await?;
        Ok(log)
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.file.write_all(line.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.file.flush().await
    }

    /// Append the record of a completed exposure
    pub async fn append(&mut self, record: &PointRecord) -> std::io::Result<()> {
        self.write_line(&format_row(record)).await?;
        self.rows += 1;
        Ok(())
    }

    /// Number of rows written, not counting the header
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and close the file
    pub async fn close(mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(axis2: Option<PositionSpan>) -> PointRecord {
        PointRecord {
            index: 0,
            axis1: PositionSpan {
                start: 0.0,
                end: 10.00004,
            },
            axis2,
            exposure_time: 600.0,
            file_name: "IMG0001.tif".into(),
        }
    }

    #[test]
    fn test_format() {
        assert_eq!(
            "rot_start:rot_end:exposure_time:file_name",
            format_header("rot", None)
        );
        assert_eq!(
            "y_start:y_end:z_start:z_end:exposure_time:file_name",
            format_header("y", Some("z"))
        );
        assert_eq!("0.0000:10.0000:600:IMG0001.tif", format_row(&record(None)));
        assert_eq!(
            "0.0000:10.0000:-1.5000:-1.5000:600:IMG0001.tif",
            format_row(&record(Some(PositionSpan {
                start: -1.5,
                end: -1.5
            })))
        );
    }

    #[tokio::test]
    async fn test_write_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.log");
        let mut log = ScanLog::create(&path, "rot", None).await.unwrap();
        log.append(&record(None)).await.unwrap();

        // Rows are visible before the log is closed
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            "rot_start:rot_end:exposure_time:file_name\n0.0000:10.0000:600:IMG0001.tif\n",
            contents
        );
        assert_eq!(1, log.rows());
        log.close().await.unwrap();
    }
}
