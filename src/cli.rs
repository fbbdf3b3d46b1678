use clap::{Args, Parser, Subcommand};
use reqwest::Url;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch a URL and show what the spider makes of it.
    Parse(ParseArgs),
    /// List the available spiders.
    List,
}

#[derive(Debug, Args)]
pub struct ParseArgs {
    /// URL to fetch and parse.
    pub url: Url,

    /// Use this spider instead of the one handling the URL.
    #[arg(long)]
    pub spider: Option<String>,

    /// Maximum depth for parsing requests.
    #[arg(short, long, default_value_t = 1)]
    pub depth: usize,

    /// Print each depth level one by one.
    #[arg(short, long)]
    pub verbose: bool,

    /// Don't show scraped items.
    #[arg(long)]
    pub noitems: bool,

    /// Don't show links to follow (extracted requests).
    #[arg(long)]
    pub nolinks: bool,

    /// Use this callback for parsing, instead of looking it up from rules.
    #[arg(short, long)]
    pub callback: Option<String>,

    /// Use crawl rules to look up the callback for the URL.
    #[arg(short, long)]
    pub rules: bool,

    /// Inject extra meta into the request, as a JSON object.
    #[arg(short, long)]
    pub meta: Option<String>,

    /// Inject extra callback keyword arguments into the request, as a JSON
    /// object.
    #[arg(long)]
    pub cbkwargs: Option<String>,

    /// Process items through the item pipelines.
    #[arg(long)]
    pub pipelines: bool,

    /// Carry --meta and --cbkwargs into requests of deeper levels.
    #[arg(long)]
    pub sticky_extras: bool,

    /// Maximum concurrent HTTP requests.
    #[arg(long, default_value_t = 16)]
    pub concurrency: usize,

    /// Delay between requests (politeness).
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// User-Agent header to send.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Fail if a rule refers to a handler the spider does not have.
    #[arg(long)]
    pub strict_rules: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["wayfarer", "parse", "https://example.com/"]).unwrap();
        let Command::Parse(args) = cli.command else {
            panic!("expected parse");
        };
        assert_eq!(args.depth, 1);
        assert!(!args.rules);
        assert!(args.spider.is_none());
    }

    #[test]
    fn parse_flags() {
        let cli = Cli::try_parse_from([
            "wayfarer",
            "parse",
            "https://example.com/",
            "--spider",
            "follow",
            "-d",
            "3",
            "-v",
            "-c",
            "parse_page",
            "-r",
            "-m",
            r#"{"a": 1}"#,
            "--cbkwargs",
            r#"{"b": 2}"#,
        ])
        .unwrap();
        let Command::Parse(args) = cli.command else {
            panic!("expected parse");
        };
        assert_eq!(args.spider.as_deref(), Some("follow"));
        assert_eq!(args.depth, 3);
        assert!(args.verbose && args.rules);
        assert_eq!(args.callback.as_deref(), Some("parse_page"));
        assert_eq!(args.meta.as_deref(), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(Cli::try_parse_from(["wayfarer", "parse", "not a url"]).is_err());
    }
}
