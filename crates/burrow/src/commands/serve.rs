use std::net::SocketAddr;

use burrow_proxy::{Credentials, ListenerConfig, ProxyConfig, ProxyServer};
use burrow_settings::{BurrowConfig, ConfigLoader, EndpointSettings};
use tracing::info;

use crate::cli::ServeArgs;
use crate::error::CliError;

pub async fn serve(args: ServeArgs) -> Result<(), CliError> {
    let settings = if args.no_config {
        // Built-in defaults plus environment only; still validated.
        let mut config = BurrowConfig::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        config
    } else {
        ConfigLoader::load(args.config.as_deref())?
    };

    let proxy_config = build_proxy_config(&settings, args.socks_listen, args.http_listen)?;
    let server = ProxyServer::new(proxy_config);

    tokio::select! {
        result = server.run() => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        }
    }
}

fn build_proxy_config(
    settings: &BurrowConfig,
    socks_listen: Option<SocketAddr>,
    http_listen: Option<SocketAddr>,
) -> Result<ProxyConfig, CliError> {
    Ok(ProxyConfig {
        socks: endpoint(&settings.socks, socks_listen)?,
        http: endpoint(&settings.http, http_listen)?,
        dial_policy: Default::default(),
    })
}

/// Map one endpoint's settings to a listener config. An explicit
/// `--*-listen` address enables the endpoint regardless of the config
/// file; otherwise a disabled endpoint stays off.
fn endpoint(
    settings: &EndpointSettings,
    listen_override: Option<SocketAddr>,
) -> Result<Option<ListenerConfig>, CliError> {
    let bind = match listen_override {
        Some(addr) => addr,
        None if settings.enabled => settings.bind_addr()?,
        None => return Ok(None),
    };

    let mut config = ListenerConfig::new(bind);
    if let Some((user, pass)) = settings.credentials() {
        config = config.with_credentials(Credentials::new(user, pass));
    }
    Ok(Some(config))
}
