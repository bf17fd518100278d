//! Common test utilities: deterministic event datasets

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HEADER: &str = "event_id,timestamp,sensor_id,energy,momentum_x,momentum_y,momentum_z,status";

/// Number of distinct sensors in generated data
pub const SENSORS: usize = 50;

/// One generated row, as the aggregation sees it
pub struct SyntheticEvent {
    pub sensor_id: usize,
    pub energy: f64,
    pub status: &'static str,
}

/// Deterministic stand-in for random sensor data.
///
/// 90% valid, 5% noise, 3% saturated, 2% invalid; 15% of events carry
/// more than 100 units of energy.
pub fn synthetic_event(i: usize) -> SyntheticEvent {
    let status = match i % 100 {
        0..=89 => "valid",
        90..=94 => "noise",
        95..=97 => "saturated",
        _ => "invalid",
    };
    let energy = if i % 20 < 17 {
        0.1 + (i * 37 % 999) as f64 / 10.0
    } else {
        100.5 + (i * 13 % 900) as f64 + 0.25
    };
    SyntheticEvent {
        sensor_id: i * 7 % SENSORS + 1,
        energy,
        status,
    }
}

pub fn write_events(path: &Path, rows: usize) {
    let mut out = BufWriter::new(File::create(path).unwrap());
    writeln!(out, "{HEADER}").unwrap();
    for i in 0..rows {
        let event = synthetic_event(i);
        writeln!(
            out,
            "{},{:.3},{},{},{:.4},{:.4},{:.4},{}",
            i + 1,
            1_735_689_600.0 + (i % 86_400) as f64,
            event.sensor_id,
            event.energy,
            (i % 100) as f64 - 50.0,
            50.0 - (i % 100) as f64,
            (i % 200) as f64 - 100.0,
            event.status
        )
        .unwrap();
    }
    out.flush().unwrap();
}

/// Dataset in a temporary directory that lives as long as the value
pub struct Dataset {
    pub dir: TempDir,
    pub path: PathBuf,
    pub rows: usize,
}

impl Dataset {
    pub fn new(rows: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.csv");
        write_events(&path, rows);
        Self { dir, path, rows }
    }

    /// Same dataset with one row's energy replaced by text
    pub fn with_bad_row(rows: usize, bad_row: usize) -> Self {
        let dataset = Self::new(rows);
        let content = std::fs::read_to_string(&dataset.path).unwrap();
        let patched: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(line, text)| {
                if line == bad_row + 1 {
                    let mut fields: Vec<&str> = text.split(',').collect();
                    fields[3] = "not-a-number";
                    fields.join(",")
                } else {
                    text.to_string()
                }
            })
            .collect();
        std::fs::write(&dataset.path, patched.join("\n") + "\n").unwrap();
        dataset
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.dir.path().join("chunks")
    }
}

/// Statistics computed the slow way, row by row
pub struct Expected {
    pub status_counts: BTreeMap<String, u64>,
    pub sensor_counts: BTreeMap<String, u64>,
    pub energy_sum: f64,
    pub high_energy_count: u64,
}

pub fn expected(rows: usize) -> Expected {
    let mut status_counts = BTreeMap::new();
    let mut sensor_counts = BTreeMap::new();
    let mut energy_sum = 0.0;
    let mut high_energy_count = 0;

    for i in 0..rows {
        let event = synthetic_event(i);
        *status_counts.entry(event.status.to_string()).or_insert(0) += 1;
        *sensor_counts.entry(event.sensor_id.to_string()).or_insert(0) += 1;
        energy_sum += event.energy;
        if event.energy > 100.0 {
            high_energy_count += 1;
        }
    }

    Expected {
        status_counts,
        sensor_counts,
        energy_sum,
        high_energy_count,
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    let tolerance = expected.abs().max(1.0) * 1e-9;
    assert!(
        (actual - expected).abs() <= tolerance,
        "{actual} differs from {expected}"
    );
}
