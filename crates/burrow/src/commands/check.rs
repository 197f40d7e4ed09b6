use burrow_proxy::{ProxyConfig, ProxyServer};
use burrow_settings::ConfigLoader;

use crate::cli::CheckArgs;
use crate::error::CliError;

pub async fn check(args: CheckArgs) -> Result<(), CliError> {
    let mut all_ok = true;

    // 1. Platform info
    println!("Platform: {}", std::env::consts::OS);
    println!("Architecture: {}", std::env::consts::ARCH);

    // 2. Proxy smoke-test on ephemeral loopback ports
    print!("Proxy: ");
    let server = ProxyServer::new(ProxyConfig::default());
    match server.start().await {
        Ok(handle) => match handle.shutdown().await {
            Ok(()) => println!("OK"),
            Err(e) => {
                println!("FAIL (shutdown) — {e}");
                all_ok = false;
            }
        },
        Err(e) => {
            println!("FAIL (start) — {e}");
            all_ok = false;
        }
    }

    // 3. Config
    println!("\nConfig files:");
    match &args.config {
        Some(path) => {
            let status = if path.exists() { "found" } else { "not found" };
            println!("  {} ({})", path.display(), status);
        }
        None => {
            let project = ConfigLoader::project_config_path();
            let status = if project.exists() { "found" } else { "not found" };
            println!("  {} ({})", project.display(), status);

            let global = ConfigLoader::global_config_path();
            let status = if global.exists() { "found" } else { "not found" };
            println!("  {} ({})", global.display(), status);
        }
    }

    match ConfigLoader::load(args.config.as_deref()) {
        Ok(config) => {
            println!("Config loaded: OK");
            for (name, endpoint) in [("socks", &config.socks), ("http", &config.http)] {
                if endpoint.enabled {
                    let auth = if endpoint.credentials().is_some() {
                        "with auth"
                    } else {
                        "no auth"
                    };
                    println!("  {name}: {}:{} ({auth})", endpoint.host, endpoint.port);
                } else {
                    println!("  {name}: disabled");
                }
            }
        }
        Err(e) => {
            println!("Config loaded: FAIL — {e}");
            all_ok = false;
        }
    }

    if !all_ok {
        return Err(CliError::Other("One or more checks failed".to_string()));
    }

    Ok(())
}
