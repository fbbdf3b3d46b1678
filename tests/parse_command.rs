use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use predicates::prelude::*;

struct Site {
    base_url: String,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for Site {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn page(title: &str, links: &[&str]) -> String {
    let links: String = links
        .iter()
        .map(|href| format!(r#"<a href="{href}">{href}</a>"#))
        .collect();
    format!("<!doctype html><html><head><title>{title}</title></head><body>{links}</body></html>")
}

fn spawn_site() -> Site {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        let request = match server.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(_) => break,
        };
        let body = match request.url() {
            "/" => page("Home", &["/a", "/b"]),
            "/a" => page("Page A", &["/c"]),
            "/b" => page("Page B", &[]),
            "/c" => page("Page C", &[]),
            _ => {
                let _ = request.respond(
                    tiny_http::Response::from_string("not found").with_status_code(404),
                );
                continue;
            }
        };
        let header = tiny_http::Header::from_bytes("Content-Type", "text/html; charset=utf-8")
            .expect("content type header");
        let _ = request.respond(tiny_http::Response::from_string(body).with_header(header));
    });

    Site {
        base_url,
        shutdown,
        handle: Some(handle),
    }
}

#[test]
fn list_prints_builtin_spiders() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wayfarer");
    cmd.args(["list"])
        .assert()
        .success()
        .stdout("follow\nlinks\n");
}

#[test]
fn follow_spider_crawls_two_levels() {
    let site = spawn_site();
    let url = format!("{}/", site.base_url);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wayfarer");
    cmd.args(["parse", &url, "--spider", "follow", "-d", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains(">>> STATUS DEPTH LEVEL 2 <<<"))
        .stdout(predicate::str::contains("\"title\": \"Page A\""))
        .stdout(predicate::str::contains("\"title\": \"Page B\""))
        .stdout(predicate::str::contains("\"title\": \"Home\"").not())
        .stdout(predicate::str::contains(format!("<GET {}/c>", site.base_url)));
}

#[test]
fn verbose_prints_every_level() {
    let site = spawn_site();
    let url = format!("{}/", site.base_url);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wayfarer");
    cmd.args(["parse", &url, "--spider", "links", "-d", "2", "-v", "--nolinks"])
        .assert()
        .success()
        .stdout(predicate::str::contains(">>> DEPTH LEVEL: 1 <<<"))
        .stdout(predicate::str::contains(">>> DEPTH LEVEL: 2 <<<"))
        .stdout(predicate::str::contains("\"title\": \"Home\""))
        .stdout(predicate::str::contains("# Requests").not());
}

#[test]
fn explicit_callback_skips_rule_dispatch() {
    let site = spawn_site();
    let url = format!("{}/", site.base_url);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wayfarer");
    cmd.args(["parse", &url, "--spider", "follow", "-c", "parse_page"])
        .assert()
        .success()
        .stdout(predicate::str::contains(">>> STATUS DEPTH LEVEL 1 <<<"))
        .stdout(predicate::str::contains("\"title\": \"Home\""));
}

#[test]
fn rules_mode_without_rules_exits_cleanly() {
    let site = spawn_site();
    let url = format!("{}/", site.base_url);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wayfarer");
    cmd.args(["parse", &url, "--spider", "links", "--rules"])
        .assert()
        .success()
        .stdout(predicate::str::contains(">>> STATUS DEPTH LEVEL 0 <<<"))
        .stderr(predicate::str::contains("No CrawlSpider rules found"));
}

#[test]
fn unknown_spider_is_reported() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wayfarer");
    cmd.args(["parse", "http://127.0.0.1:9/", "--spider", "nope"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Unable to find spider: nope"));
}

#[test]
fn invalid_meta_is_an_error() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wayfarer");
    cmd.args(["parse", "http://127.0.0.1:9/", "--spider", "links", "-m", "[1]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--meta"));
}
