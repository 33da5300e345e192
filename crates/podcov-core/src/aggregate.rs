//! Reduce the coverage tool's textual percent report to one number.
//!
//! The report has one line per group of packages, e.g.
//!
//! ```text
//! 	example.com/pkg/a	example.com/pkg/b	coverage: 50.0% of statements
//! ```
//!
//! Every package counts equally: the result is the plain mean of the
//! reported percentages, not weighted by statement count.

/// Marker separating package names from the percentage on a report line.
pub const COVERAGE_MARKER: &str = "coverage:";

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("failed to parse coverage value {value:?} on line {line}")]
    Parse {
        line: usize,
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    #[error("no coverage data found in the output")]
    NoData,
}

/// Parsed form of a percent report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentageReport {
    /// Sum of every parsed percentage.
    pub total: f64,
    /// Number of contributing packages (the divisor).
    pub units: usize,
    /// `total / units`.
    pub average: f64,
}

/// Parse a percent report into its sum, unit count and mean.
pub fn parse_report(output: &str) -> Result<PercentageReport, AggregateError> {
    let mut total = 0.0;
    let mut units = 0usize;

    for (idx, line) in output.lines().enumerate() {
        if !line.contains(COVERAGE_MARKER) {
            continue;
        }
        let mut parts = line.split(COVERAGE_MARKER);
        let (Some(packages), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };

        let value = value.trim();
        let value = value.split('%').next().unwrap_or_default().trim();
        let coverage: f64 = value.parse().map_err(|source| AggregateError::Parse {
            line: idx + 1,
            value: value.to_owned(),
            source,
        })?;

        units += packages
            .split('\t')
            .filter(|pkg| !pkg.trim().is_empty())
            .count();
        total += coverage;
    }

    if units == 0 {
        return Err(AggregateError::NoData);
    }

    Ok(PercentageReport {
        total,
        units,
        average: total / units as f64,
    })
}

/// Mean coverage percentage across every package in the report.
pub fn aggregate(output: &str) -> Result<f64, AggregateError> {
    parse_report(output).map(|r| r.average)
}
