//! Line-oriented console output: banner, per-proxy lines, window title and
//! the final summary.

use crate::config::Settings;
use crate::proxy::models::{CheckReport, Progress, RunSummary};
use crate::proxy::verdict::Tone;
use crossterm::style::{Color, Stylize};
use crossterm::{execute, terminal::SetTitle};
use std::io::{self, Write};

const BANNER: &str = r"
 ___ ___  _____ ____   __  ___ ___ _____   _____
| _ \ _ \/ _ \ \/ /\ \ / / / __|_ _| __\ \ / / __|
|  _/   / (_) >  <  \ V /  \__ \| || _| \ V /| _|
|_| |_|_\\___/_/\_\  |_|   |___/___|___| \_/ |___|
";

fn tone_color(tone: Tone) -> Option<Color> {
    match tone {
        Tone::Plain => None,
        Tone::Good => Some(Color::Green),
        Tone::Warn => Some(Color::Yellow),
        Tone::Bad => Some(Color::Red),
    }
}

fn paint(text: &str, tone: Tone) -> String {
    match tone_color(tone) {
        Some(color) => text.with(color).to_string(),
        None => text.to_string(),
    }
}

/// Render the terminal line of one proxy
pub fn render_report(report: &CheckReport, colored: bool) -> String {
    let label = report.label();
    match report {
        CheckReport::Malformed { error, .. } => {
            let reason = error.to_string();
            if colored {
                format!("{} | {}", label.white(), paint(&reason, Tone::Bad))
            } else {
                format!("{label} | {reason}")
            }
        }
        CheckReport::Checked { verdict, .. } => {
            if !colored {
                return format!("{label} | {}", verdict.diagnostic);
            }

            let body: Vec<String> = verdict
                .diagnostic
                .segments()
                .iter()
                .map(|segment| paint(&segment.text, segment.tone))
                .collect();
            format!("{} | {}", label.white(), body.join(" | "))
        }
    }
}

/// Window title text for a progress snapshot
pub fn title_for(progress: &Progress) -> String {
    format!(
        "Proxy Checker | Checked: {}/{} | Good: {}",
        progress.checked, progress.total, progress.good
    )
}

pub fn set_title(title: &str) {
    // Terminals without title support just ignore the escape sequence.
    let _ = execute!(io::stdout(), SetTitle(title));
}

pub fn print_banner() {
    println!("{}", BANNER.green());
}

pub fn print_settings(settings: &Settings) {
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    let imports: Vec<String> = settings
        .import
        .iter()
        .map(|p| p.display().to_string())
        .collect();

    let mut lines = vec![
        "--- Settings ---".to_string(),
        format!("    Threads: {}", settings.threads),
        format!("    HTTP timeout (s): {}", settings.timeout),
        format!("    Max host latency (ms): {}", settings.max_ms),
        format!("    Import files: {}", imports.join(", ")),
        format!("    Export file: {}", settings.export.display()),
        format!("    Host check URL: {}", settings.host_check_url),
        format!("    IP check URL: {}", settings.ip_check_url),
        format!("    Ping enabled: {}", yes_no(settings.enable_ping)),
    ];
    if settings.enable_ping {
        lines.push(format!("      Ping timeout (ms): {}", settings.ping_timeout_ms));
    }
    lines.push(format!(
        "    Speed test enabled: {}",
        yes_no(settings.enable_speed_test)
    ));
    if settings.enable_speed_test {
        lines.push(format!("      Speed test URL: {}", settings.speed_test_url));
        lines.push(format!(
            "      Good speed (KB/s): {}",
            settings.speed_min_good_kbps
        ));
    }
    lines.push("-".repeat(35));

    for line in lines {
        println!("{}", line.cyan());
    }
}

/// Print one completion line, colored by the verdict
pub fn print_report(report: &CheckReport) {
    let line = render_report(report, true);
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
}

pub fn print_summary(summary: &RunSummary, max_ms: u64) {
    let rule = "=".repeat(40);
    let export = summary
        .export_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    println!();
    println!("{}", rule.as_str().green());
    println!("{}", format!("Finished in {} s.", summary.elapsed.as_secs()).green());
    println!("{}", format!("Checked: {} of {}", summary.checked, summary.total).green());
    println!(
        "{}",
        format!("Good proxies (< {max_ms}ms): {}", summary.good).green()
    );
    println!("{}", format!("Results saved to: {export}").green());
    println!("{}", rule.as_str().green());
}
