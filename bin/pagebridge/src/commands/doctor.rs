use pagebridge_bridge::launcher::{find_browser_binary, find_free_port, list_available_browsers};
use pagebridge_core::{BridgeConfig, Paths};

/// Run environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 pagebridge doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    if paths.config_file().exists() {
        print_ok("Config file exists", &paths.config_file().display().to_string());
        ok_count += 1;
    } else {
        print_warn("Config file not found", "Defaults apply; run `pagebridge config init`");
        warn_count += 1;
    }

    let config = match BridgeConfig::load_or_default(&paths) {
        Ok(config) => {
            print_ok("Config parses", "");
            ok_count += 1;
            config
        }
        Err(e) => {
            print_err("Config invalid", &e.to_string());
            err_count += 1;
            BridgeConfig::default()
        }
    };
    println!();

    // --- 2. Browser ---
    println!("🌐 Browser");
    match find_browser_binary(config.chrome_executable.as_deref()) {
        Some(path) => {
            print_ok("Browser found", &path);
            ok_count += 1;
        }
        None => {
            print_err("No browser found", "Install Chrome/Chromium or set chromeExecutable");
            err_count += 1;
        }
    }
    let others = list_available_browsers();
    if others.len() > 1 {
        println!("  Also installed: {}", others[1..].join(", "));
    }

    match find_free_port(config.debug_port).await {
        Ok(port) if port == config.debug_port => {
            print_ok("Debugging port free", &port.to_string());
            ok_count += 1;
        }
        Ok(port) => {
            print_warn(
                "Debugging port busy",
                &format!("{} in use, will use {}", config.debug_port, port),
            );
            warn_count += 1;
        }
        Err(e) => {
            print_err("No debugging port available", &e.to_string());
            err_count += 1;
        }
    }

    if config.store_user_data {
        println!("  Profile: {}", paths.user_data_dir().display());
    }
    println!();

    println!("================================");
    println!(
        "Summary: {} ok, {} warnings, {} errors",
        ok_count, warn_count, err_count
    );
    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}
