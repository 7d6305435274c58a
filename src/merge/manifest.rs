//! Content of the synthesized `META-INF/MANIFEST.MF` and
//! `build-data.properties` entries.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

use super::config::BuildEnvironment;

const BUILD_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// The output manifest. Lines are `\r\n` terminated and a blank line ends
/// the main section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub main_class: Option<String>,
    /// Raw lines appended after the fixed header, in order.
    pub lines: Vec<String>,
}

impl Manifest {
    pub fn new(main_class: Option<String>, lines: Vec<String>) -> Self {
        Self { main_class, lines }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Manifest-Version: 1.0\r\nCreated-By: singlejar\r\n");
        if let Some(main_class) = &self.main_class {
            out.push_str("Main-Class: ");
            out.push_str(main_class);
            out.push_str("\r\n");
        }
        for line in &self.lines {
            out.push_str(line.trim_end_matches(['\r', '\n']));
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

/// Ordered `key=value` pairs without duplicate keys. Setting a key that is
/// already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildProperties {
    entries: Vec<(String, String)>,
}

impl BuildProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard entries: target, time, timestamp, user and host. With
    /// `normalize` the time fields describe 1980-01-01 00:00:00 instead of
    /// `started`, so repeated runs produce the same bytes.
    pub fn standard(
        target: &str,
        started: DateTime<Local>,
        environment: &BuildEnvironment,
        normalize: bool,
    ) -> Self {
        let (time, timestamp) = if normalize {
            let epoch = normalized_epoch();
            (
                epoch.format(BUILD_TIME_FORMAT).to_string(),
                epoch.and_utc().timestamp(),
            )
        } else {
            (
                started.format(BUILD_TIME_FORMAT).to_string(),
                started.timestamp(),
            )
        };

        let mut properties = Self::new();
        properties.set("build.target", target);
        properties.set("build.time", time);
        properties.set("build.timestamp", timestamp.to_string());
        properties.set("build.user", environment.user.as_str());
        properties.set("build.host", environment.host.as_str());
        properties
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Merge the content of a build-info file. Blank lines and comments
    /// (`#` or `!`) are skipped.
    pub fn merge_text(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            self.add_line(line);
        }
    }

    /// Add one `key=value` pair. A line without `=` is a key with an empty
    /// value.
    pub fn add_line(&mut self, line: &str) {
        let (key, value) = line.split_once('=').unwrap_or((line, ""));
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        self.set(key, value.trim());
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalized_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}
