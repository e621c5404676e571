//!
//! roadside-admin CLI binary
//! -------------------------
//! Operator tool over the dashboard session core: log in against the REST
//! backend, inspect the current user and permissions, edit a user's permission
//! override list, or sit in `watch` mode with the idle-logout monitor running.
//! Session state persists in the storage file named by `ROADSIDE_STORAGE_PATH`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use roadside_admin::identity::{
    ActivityEvent, BootstrapOutcome, InactivityMonitor, InactivitySettings, LogoutReason, Permission, SessionEvent,
};
use roadside_admin::{AdminConfig, SessionContext};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} login <username> <password>\n  {program} whoami\n  {program} can <perm>...        # all of\n  {program} any <perm>...        # any of\n  {program} grant <user_id> <perm>...\n  {program} logout\n  {program} watch                # run the idle monitor; type a line to count as activity, 'stay' to dismiss a warning\n\nEnvironment:\n  ROADSIDE_CONFIG, ROADSIDE_API_BASE, ROADSIDE_STORAGE_PATH, ROADSIDE_LOGIN_REDIRECT,\n  ROADSIDE_IDLE_TIMEOUT_SECS, ROADSIDE_IDLE_WARNING_SECS, ROADSIDE_IDLE_POLL_MS,\n  ROADSIDE_MASTER_ACCOUNTS, ROADSIDE_PERMISSION_POLICY, ROADSIDE_REQUEST_TIMEOUT_SECS, RUST_LOG"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "roadside-admin".to_string());
    let Some(cmd) = args.get(1).map(|s| s.as_str()) else {
        print_usage(&program);
        return Ok(());
    };
    if matches!(cmd, "-h" | "--help" | "help") {
        print_usage(&program);
        return Ok(());
    }
    let rest = &args[2..];

    let config = AdminConfig::from_env()?;
    info!(
        api_base = %config.api_base,
        storage = ?config.storage_path,
        idle_timeout_secs = config.idle_timeout_secs,
        "roadside-admin starting"
    );
    let session = Arc::new(SessionContext::from_config(config)?);

    match cmd {
        "login" => {
            let (Some(user), Some(pass)) = (rest.first(), rest.get(1)) else {
                return Err(anyhow!("login needs <username> <password>"));
            };
            let profile = session.login(user, pass).await?;
            println!("logged in as {} (id {})", profile.display_name(), profile.id);
        }
        "whoami" => {
            let outcome = session.bootstrap().await;
            let Some(user) = outcome.user() else {
                println!("not logged in");
                return Ok(());
            };
            let via = if matches!(outcome, BootstrapOutcome::Cached(_)) {
                " (cached; backend unreachable)"
            } else {
                ""
            };
            println!("{} <{}> id={} role={}{}", user.display_name(), user.email, user.id, user.role.as_deref().unwrap_or("-"), via);
            if let (Some(source), Some(since)) = (session.profile_source(), session.started_at()) {
                println!("profile: {:?}, session started {}", source, since.to_rfc3339());
            }
            println!("permissions: {:?}", session.permission_source());
            if session.is_bypass() {
                println!("  (every permission)");
            }
            for p in session.granted_permissions() {
                println!("  {}", p);
            }
        }
        "can" | "any" => {
            if rest.is_empty() { return Err(anyhow!("{} needs at least one permission", cmd)); }
            session.bootstrap().await;
            let ok = if cmd == "can" { session.has_all_permissions(rest) } else { session.has_any_permission(rest) };
            println!("{}", if ok { "allowed" } else { "denied" });
        }
        "grant" => {
            let user_id: i64 = rest.first().ok_or_else(|| anyhow!("grant needs <user_id>"))?.parse()?;
            let perms: Vec<Permission> = rest[1..].iter().map(|p| Permission::from(p.as_str())).collect();
            if session.bootstrap().await.user().is_none() { return Err(anyhow!("not logged in")); }
            session.update_permission_overrides(user_id, perms).await?;
            println!("updated permission overrides for user {}", user_id);
        }
        "logout" => {
            session.bootstrap().await;
            let redirect = session.logout(LogoutReason::UserRequested).await?;
            println!("logged out; continue at {}", redirect);
        }
        "watch" => watch_session(session).await?,
        other => {
            print_usage(&program);
            return Err(anyhow!("unknown command {:?}", other));
        }
    }
    Ok(())
}

async fn watch_session(session: Arc<SessionContext>) -> Result<()> {
    let mut events = session.subscribe();
    if session.bootstrap().await.user().is_none() {
        println!("not logged in");
        return Ok(());
    }
    let monitor = Arc::new(InactivityMonitor::new(InactivitySettings::from_config(session.config()), Instant::now()));
    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = tokio::spawn(monitor.clone().run(session.clone(), stop_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(l) if l.trim().eq_ignore_ascii_case("stay") => {
                        monitor.stay_logged_in(Instant::now());
                    }
                    Some(_) => {
                        monitor.record(ActivityEvent::KeyDown, Instant::now());
                    }
                    None => break,
                }
            }
            ev = events.recv() => {
                match ev {
                    Ok(SessionEvent::IdleWarning { remaining_secs }) => println!("idle: logging out in {}s (type 'stay')", remaining_secs),
                    Ok(SessionEvent::IdleWarningCleared) => println!("idle warning cleared"),
                    Ok(SessionEvent::LoggedOut { reason, redirect }) => {
                        println!("logged out ({:?}); continue at {}", reason, redirect);
                        break;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event stream lagged"),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    let _ = stop_tx.send(true);
    runner.await?;
    Ok(())
}
