use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use isnick_engine::app::{ABOUT_TEXT, HELP_TEXT};
use isnick_engine::paths::AppPaths;
use isnick_engine::progress::ProgressState;
use isnick_engine::sites::{SitePolicy, UNLISTED_NAME};
use isnick_engine::DownloadApp;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct Args {
    base_dir: Option<PathBuf>,
    binary: Option<PathBuf>,
    site: Option<String>,
    url: Option<String>,
    list_sites: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let argv: Vec<String> = std::env::args().collect();
    if argv.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return ExitCode::SUCCESS;
    }
    if argv.iter().any(|a| a == "--about") {
        print!("{ABOUT_TEXT}");
        return ExitCode::SUCCESS;
    }

    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };

    let Some(paths) = AppPaths::resolve(args.base_dir.clone()) else {
        eprintln!("could not determine base dir; pass --base-dir");
        return ExitCode::from(2);
    };

    // Without a sandbox nothing may run.
    let mut app = match DownloadApp::open(paths) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("Sandbox Error: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(msg) = run(&mut app, &args) {
        eprintln!("Error: {msg}");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

fn run(app: &mut DownloadApp, args: &Args) -> Result<(), String> {
    if args.list_sites {
        for site in app.list_sites() {
            let marker = if app.selected_site().name() == site { "*" } else { " " };
            println!("{marker} {site}");
        }
        let marker = if app.selected_site() == SitePolicy::Unlisted { "*" } else { " " };
        println!("{marker} {UNLISTED_NAME}");
    }

    if let Some(binary) = &args.binary {
        app.choose_binary(binary).map_err(|e| e.to_string())?;
        println!("Binary: {}", binary.display());
    }

    if let Some(site) = &args.site {
        app.select_site_by_name(site).map_err(|e| e.to_string())?;
        println!("Site: {}", app.selected_site());
    }

    let Some(url) = &args.url else {
        return Ok(());
    };

    println!("Download location: {}", app.sandbox_dir().display());
    app.start_download(url).map_err(|e| e.to_string())?;

    let mut last: Option<ProgressState> = None;
    loop {
        let state = app.current_progress();
        if last.as_ref() != Some(&state) {
            println!(
                "Status: {:<32} {:>3}%  Speed: {}",
                state.phase.label(),
                state.percent,
                state.speed.as_deref().unwrap_or("-")
            );
            last = Some(state.clone());
        }
        if state.phase.is_finished() {
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    let mut args = Args::default();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--base-dir" => {
                i += 1;
                let v = argv
                    .get(i)
                    .ok_or_else(|| "--base-dir requires a value".to_string())?;
                args.base_dir = Some(PathBuf::from(v));
            }
            "--binary" => {
                i += 1;
                let v = argv
                    .get(i)
                    .ok_or_else(|| "--binary requires a value".to_string())?;
                args.binary = Some(PathBuf::from(v));
            }
            "--site" => {
                i += 1;
                let v = argv
                    .get(i)
                    .ok_or_else(|| "--site requires a value".to_string())?;
                args.site = Some(v.to_string());
            }
            "--list-sites" => args.list_sites = true,
            other if other.starts_with('-') => {
                return Err(format!("unknown arg: {other} (try --help)"));
            }
            other => {
                if args.url.is_some() {
                    return Err("only one URL may be given".to_string());
                }
                args.url = Some(other.to_string());
            }
        }
        i += 1;
    }
    Ok(args)
}

fn print_help() {
    println!("isnick_download - fetch media with yt-dlp into a private sandbox directory");
    println!();
    println!("Usage:");
    println!("  isnick_download [--base-dir <dir>] [--binary <path>] [--site <name>] [URL]");
    println!("  isnick_download --list-sites");
    println!();
    println!("Options:");
    println!("  --base-dir <dir>   App data dir (default: $ISNICK_BASE_DIR or the platform config dir)");
    println!("  --binary <path>    Pin the yt-dlp executable (file name must start with yt-dlp)");
    println!("  --site <name>      Select a site, or Unlisted to accept any http(s) URL");
    println!("  --list-sites       Show sites; * marks the active one");
    println!("  --about            Show version info");
    println!();
    print!("{HELP_TEXT}");
}
