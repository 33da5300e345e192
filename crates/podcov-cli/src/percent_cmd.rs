use std::io::Read;

use anyhow::{Context, Result};

use podcov_core::parse_report;

/// Read a saved percent report and print its mean coverage.
///
/// `source` is a file path, or `-` for stdin.
pub fn run_percent(source: &str) -> Result<()> {
    let report = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read report from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("failed to read report file {source}"))?
    };

    print!("{}", summarize(&report)?);
    Ok(())
}

fn summarize(report: &str) -> Result<String> {
    let parsed = parse_report(report).context("error calculating total coverage")?;
    Ok(format!(
        "Total Average Coverage: {:.2}%\n  packages: {}\n",
        parsed.average, parsed.units
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_average_and_packages() {
        let report = "\tex/a\tex/b\tcoverage: 100.0% of statements\n\tex/c\t\tcoverage: 50.0% of statements\n";
        assert_eq!(
            summarize(report).unwrap(),
            "Total Average Coverage: 50.00%\n  packages: 3\n"
        );
    }

    #[test]
    fn empty_report_is_an_error() {
        let err = summarize("ok\n").unwrap_err();
        assert!(
            format!("{err:#}").contains("no coverage data"),
            "unexpected error: {err:#}"
        );
    }
}
