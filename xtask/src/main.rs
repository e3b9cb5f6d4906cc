use std::process::Command;

use anyhow::{Context, Result, bail};
use regex::Regex;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let task = args.next().unwrap_or_else(|| "help".to_string());
    match task.as_str() {
        "tck" => run_tck(args.collect()),
        "test" => run_tests(args.collect()),
        _ => {
            print_help();
            Ok(())
        }
    }
}

/// Harness settings passed to the runner through its environment
#[derive(Debug, Default)]
struct TckOptions {
    delay_factor: Option<String>,
    filter: Option<String>,
    expensive: bool,
    impl_details: bool,
    runs: Option<String>,
}

fn parse_tck_args(args: &[String]) -> Result<TckOptions> {
    let mut options = TckOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--delay-factor" => {
                let value = iter.next().context("--delay-factor needs a value")?;
                let factor: f32 = value
                    .parse()
                    .with_context(|| format!("bad delay factor {:?}", value))?;
                if !(factor.is_finite() && factor > 0.0) {
                    bail!("delay factor must be positive, got {}", factor);
                }
                options.delay_factor = Some(value.clone());
            }
            "--filter" => {
                let pattern = iter.next().context("--filter needs a pattern")?;
                Regex::new(pattern).with_context(|| format!("bad filter {:?}", pattern))?;
                options.filter = Some(pattern.clone());
            }
            "--runs" => {
                let value = iter.next().context("--runs needs a count")?;
                value
                    .parse::<u32>()
                    .with_context(|| format!("bad run count {:?}", value))?;
                options.runs = Some(value.clone());
            }
            "--expensive" => options.expensive = true,
            "--impl-details" => options.impl_details = true,
            other => bail!("unknown tck option {:?}", other),
        }
    }
    Ok(options)
}

fn run_tck(args: Vec<String>) -> Result<()> {
    let options = parse_tck_args(&args)?;
    let mut cmd = Command::new("cargo");
    cmd.arg("run")
        .arg("-p").arg("tck-suites")
        .arg("--bin").arg("tck-runner");
    if let Some(factor) = &options.delay_factor {
        cmd.env("TCK_DELAY_FACTOR", factor);
    }
    if let Some(filter) = &options.filter {
        cmd.env("TCK_METHOD_FILTER", filter);
    }
    if let Some(runs) = &options.runs {
        cmd.env("TCK_RUNS_PER_TEST", runs);
    }
    if options.expensive {
        cmd.env("TCK_EXPENSIVE_TESTS", "true");
    }
    if options.impl_details {
        cmd.env("TCK_IMPLEMENTATION_DETAILS", "true");
    }
    run(&mut cmd, "tck")
}

fn run_tests(args: Vec<String>) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test").arg("--workspace").args(args);
    run(&mut cmd, "workspace tests")
}

fn run(cmd: &mut Command, name: &str) -> Result<()> {
    println!("[xtask] {}: {:?}", name, cmd);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {}", name))?;
    if !status.success() {
        bail!("{} failed with status {:?}", name, status);
    }
    Ok(())
}

fn print_help() {
    println!(
        "xtask usage:\n  cargo run -p xtask -- tck [--delay-factor F] [--filter REGEX] [--expensive] [--impl-details] [--runs N]\n  cargo run -p xtask -- test [cargo test args]"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_tck_args() {
        let options = parse_tck_args(&args(&[
            "--delay-factor", "2.5", "--filter", "^test_cas", "--expensive", "--runs", "3",
        ]))
        .unwrap();
        assert_eq!(options.delay_factor.as_deref(), Some("2.5"));
        assert_eq!(options.filter.as_deref(), Some("^test_cas"));
        assert!(options.expensive);
        assert!(!options.impl_details);
        assert_eq!(options.runs.as_deref(), Some("3"));
    }

    #[test]
    fn test_parse_tck_args_rejects_bad_values() {
        assert!(parse_tck_args(&args(&["--delay-factor", "0"])).is_err());
        assert!(parse_tck_args(&args(&["--filter", "("])).is_err());
        assert!(parse_tck_args(&args(&["--runs"])).is_err());
        assert!(parse_tck_args(&args(&["--fast"])).is_err());
    }
}
