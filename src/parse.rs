//! The `parse` command: crawl a single URL up to a depth and print what was
//! scraped on each level.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::{error, info};

use crate::cli::ParseArgs;
use crate::config::CrawlerConfig;
use crate::downloader::HttpDownloader;
use crate::driver::DriverOptions;
use crate::error::CrawlError;
use crate::ledger::DepthLedger;
use crate::loader::{ParseJob, SpiderLoader};
use crate::requests::{Kwargs, Meta, Request, RequestDelay};

/// What to print of a ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    /// Print each level on its own
    pub verbose: bool,
    pub noitems: bool,
    pub nolinks: bool,
}

pub async fn run(args: ParseArgs, loader: &SpiderLoader) -> Result<()> {
    let report_options = ReportOptions {
        verbose: args.verbose,
        noitems: args.noitems,
        nolinks: args.nolinks,
    };
    let meta = parse_json_object("--meta", args.meta.as_deref())?;
    let cb_kwargs = parse_json_object("--cbkwargs", args.cbkwargs.as_deref())?;

    let entry = match &args.spider {
        Some(name) => loader.load(name),
        None => loader.for_url(&args.url),
    };
    let entry = match entry {
        Ok(entry) => entry,
        Err(err) => {
            error!("{}", err);
            print!("{}", render(&DepthLedger::new(), report_options));
            return Ok(());
        }
    };
    if args.depth == 0 {
        print!("{}", render(&DepthLedger::new(), report_options));
        return Ok(());
    }

    let mut config = CrawlerConfig::default()
        .max_concurrent_requests(args.concurrency)
        .strict_rules(args.strict_rules);
    if args.delay_ms > 0 {
        config = config.request_delay(RequestDelay::fixed(Duration::from_millis(args.delay_ms)));
    }
    if let Some(user_agent) = &args.user_agent {
        config = config.user_agent(user_agent.as_str());
    }
    let downloader = Arc::new(HttpDownloader::new(&config)?);

    info!(spider = entry.name(), url = %args.url, depth = args.depth, "parsing");
    let report = entry
        .parse(ParseJob {
            url: args.url,
            options: DriverOptions {
                max_depth: args.depth,
                callback: args.callback,
                rules: args.rules,
                meta,
                cb_kwargs,
                sticky_extras: args.sticky_extras,
            },
            config,
            pipelines: args.pipelines,
            downloader,
        })
        .await?;
    info!(
        requests = report.stats.request_count,
        responses = report.stats.success_count,
        errors = report.stats.error_count,
        filtered = report.stats.filtered_count,
        "crawl finished"
    );

    print!("{}", render(&report.ledger, report_options));
    Ok(())
}

/// Parses an optional `--meta`/`--cbkwargs` argument.
pub fn parse_json_object(option: &'static str, raw: Option<&str>) -> Result<Meta, CrawlError> {
    let Some(raw) = raw else {
        return Ok(Kwargs::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CrawlError::InvalidJson {
            option,
            reason: format!("got {}", other),
        }),
        Err(err) => Err(CrawlError::InvalidJson {
            option,
            reason: err.to_string(),
        }),
    }
}

/// Renders the ledger the way `parse` prints it.
pub fn render(ledger: &DepthLedger<Value>, options: ReportOptions) -> String {
    let mut out = String::new();
    if options.verbose {
        for level in 1..=ledger.max_depth() {
            let _ = writeln!(out, "\n>>> DEPTH LEVEL: {} <<<", level);
            if !options.noitems {
                write_items(&mut out, ledger.items_at(level).iter());
            }
            if !options.nolinks {
                write_requests(&mut out, ledger.requests_at(level));
            }
        }
    } else {
        let _ = writeln!(out, "\n>>> STATUS DEPTH LEVEL {} <<<", ledger.max_depth());
        if !options.noitems {
            write_items(&mut out, ledger.all_items());
        }
        if !options.nolinks {
            write_requests(&mut out, ledger.frontier());
        }
    }
    out
}

fn write_items<'a>(out: &mut String, items: impl Iterator<Item = &'a Value>) {
    let items: Vec<&Value> = items.collect();
    let _ = writeln!(out, "# Scraped Items  {}", "-".repeat(60));
    let pretty = serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string());
    let _ = writeln!(out, "{}", pretty);
}

fn write_requests(out: &mut String, requests: &[Request]) {
    let _ = writeln!(out, "# Requests  {}", "-".repeat(65));
    let lines: Vec<String> = requests.iter().map(ToString::to_string).collect();
    let _ = writeln!(out, "[{}]", lines.join(",\n "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(path: &str) -> Request {
        Request::new(format!("http://example.com{}", path).parse().unwrap())
    }

    fn ledger() -> DepthLedger<Value> {
        let mut ledger = DepthLedger::new();
        ledger.add_items(1, vec![json!({"url": "http://example.com/"})]);
        ledger.add_requests(1, vec![request("/a")]);
        ledger.add_items(2, vec![json!({"url": "http://example.com/a"})]);
        ledger.add_requests(2, vec![request("/b"), request("/c")]);
        ledger
    }

    #[test]
    fn status_report_shows_all_items_and_the_frontier() {
        let out = render(&ledger(), ReportOptions::default());
        assert!(out.starts_with("\n>>> STATUS DEPTH LEVEL 2 <<<\n"));
        assert!(out.contains(&format!("# Scraped Items  {}\n", "-".repeat(60))));
        assert!(out.contains("\"url\": \"http://example.com/\""));
        assert!(out.contains("\"url\": \"http://example.com/a\""));
        assert!(out.contains("[<GET http://example.com/b>,\n <GET http://example.com/c>]"));
        assert!(!out.contains("<GET http://example.com/a>"));
    }

    #[test]
    fn verbose_report_lists_every_level() {
        let options = ReportOptions {
            verbose: true,
            noitems: true,
            ..Default::default()
        };
        let out = render(&ledger(), options);
        assert!(out.contains(">>> DEPTH LEVEL: 1 <<<"));
        assert!(out.contains(">>> DEPTH LEVEL: 2 <<<"));
        assert!(out.contains("[<GET http://example.com/a>]"));
        assert!(!out.contains("# Scraped Items"));
    }

    #[test]
    fn empty_report() {
        let options = ReportOptions {
            nolinks: true,
            ..Default::default()
        };
        let out = render(&DepthLedger::new(), options);
        assert_eq!(
            out,
            format!("\n>>> STATUS DEPTH LEVEL 0 <<<\n# Scraped Items  {}\n[]\n", "-".repeat(60))
        );
    }

    #[test]
    fn json_arguments_must_be_objects() {
        assert!(parse_json_object("--meta", None).unwrap().is_empty());
        assert_eq!(
            parse_json_object("--meta", Some(r#"{"a": 1}"#)).unwrap()["a"],
            json!(1)
        );
        assert!(matches!(
            parse_json_object("--cbkwargs", Some("[1]")),
            Err(CrawlError::InvalidJson { option: "--cbkwargs", .. })
        ));
        assert!(parse_json_object("--meta", Some("{")).is_err());
    }
}
