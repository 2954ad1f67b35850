use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::Utc;

use crate::crawl::JobRecord;

/// Plain-text log of extracted jobs, one block per record.
pub struct ReportWriter {
    out: BufWriter<File>,
    count: usize,
}

impl ReportWriter {
    /// Append to `path`, starting a new run section.
    pub fn append(path: &Path) -> io::Result<Self> {
        let mut writer = Self::open(path, true)?;
        writeln!(writer.out, "=== Run started {} ===\n", Utc::now().to_rfc3339())?;
        writer.out.flush()?;
        Ok(writer)
    }

    /// Replace `path` with a fresh report.
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::open(path, false)
    }

    fn open(path: &Path, append: bool) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            count: 0,
        })
    }

    /// Write one record and flush so a crashed run still leaves its log.
    pub fn write_record(&mut self, record: &JobRecord) -> io::Result<()> {
        self.count += 1;
        self.out.write_all(render(self.count, record).as_bytes())?;
        self.out.flush()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

pub fn render(index: usize, job: &JobRecord) -> String {
    format!(
        "Job {}:\n  Title: {}\n  URL: {}\n  Location: {}\n  Company: {}\n  Description: {}\n\n",
        index, job.title, job.url, job.location, job.company, job.description
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(url: &str) -> JobRecord {
        JobRecord {
            title: "Dev".into(),
            company: "Acme".into(),
            location: "Remote".into(),
            description: "Build things".into(),
            url: url.into(),
        }
    }

    #[test]
    fn render_block() {
        let text = render(2, &job("https://jobs.test/a"));
        assert_eq!(
            text,
            "Job 2:\n  Title: Dev\n  URL: https://jobs.test/a\n  Location: Remote\n  Company: Acme\n  Description: Build things\n\n"
        );
    }

    #[test]
    fn append_keeps_earlier_runs() {
        let path = std::env::temp_dir().join(format!("job_scraper_report_{}.txt", std::process::id()));
        fs::remove_file(&path).ok();

        let mut first = ReportWriter::append(&path).unwrap();
        first.write_record(&job("https://jobs.test/a")).unwrap();
        drop(first);
        let mut second = ReportWriter::append(&path).unwrap();
        second.write_record(&job("https://jobs.test/b")).unwrap();
        assert_eq!(second.count(), 1);
        drop(second);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("=== Run started").count(), 2);
        assert!(text.contains("https://jobs.test/a"));
        assert!(text.contains("https://jobs.test/b"));

        let mut fresh = ReportWriter::create(&path).unwrap();
        fresh.write_record(&job("https://jobs.test/c")).unwrap();
        drop(fresh);
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("https://jobs.test/a"));
        fs::remove_file(&path).ok();
    }
}
