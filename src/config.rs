//! Workload file loading and ring validation.
//!
//! File format: the first non-blank line is the station count, followed by
//! one workload (package groups) per station. Blank lines are skipped and
//! anything after the last station's line is ignored.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::types::StationId;

/// Default cap on stations (and therefore conveyors and threads).
pub const MAX_STATIONS: usize = 10;

/// Parsed contents of a workload file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadFile {
    pub station_count: usize,
    pub workloads: Vec<u32>,
}

impl WorkloadFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut values = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
            .map(|(line, raw)| {
                raw.parse::<i64>()
                    .map(|value| (line, value))
                    .map_err(|_| ConfigError::InvalidNumber {
                        line,
                        text: raw.to_string(),
                    })
            });

        let (count_line, count) = values.next().ok_or(ConfigError::MissingStationCount)??;
        // The station cap is checked by `validate`, against the caller's limit.
        let station_count = usize::try_from(count)
            .ok()
            .filter(|&count| count >= 1)
            .ok_or(ConfigError::NonPositiveStationCount {
                line: count_line,
                value: count,
            })?;

        let mut workloads = Vec::new();
        for station in 0..station_count {
            let Some(value) = values.next() else {
                break;
            };
            let (line, value) = value?;
            if value < 0 {
                return Err(ConfigError::NegativeWorkload { station, value });
            }
            let workload = u32::try_from(value).map_err(|_| ConfigError::InvalidNumber {
                line,
                text: value.to_string(),
            })?;
            workloads.push(workload);
        }

        Ok(Self {
            station_count,
            workloads,
        })
    }

    /// Check the parsed file against a station cap.
    pub fn validate(&self, max_stations: usize) -> Result<(), ConfigError> {
        validate_ring(self.station_count, &self.workloads, max_stations)
    }
}

/// Reject rings the coordinator must not start.
pub fn validate_ring(
    station_count: usize,
    workloads: &[u32],
    max_stations: usize,
) -> Result<(), ConfigError> {
    if station_count == 0 || station_count > max_stations {
        return Err(ConfigError::StationCountOutOfRange {
            count: station_count,
            max: max_stations,
        });
    }
    if workloads.len() != station_count {
        return Err(ConfigError::WorkloadLengthMismatch {
            expected: station_count,
            actual: workloads.len(),
        });
    }
    Ok(())
}

/// Input and output conveyor indices of a station in an `n`-station ring.
pub fn ring_wiring(station: StationId, n: usize) -> (usize, usize) {
    (station, (station + 1) % n)
}
