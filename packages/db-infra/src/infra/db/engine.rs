//! Engine factory: turns [`PoolSettings`] into a live sea-orm connection
//! backed by a sqlx pool, translating the pool strategy into the parameters
//! that strategy actually accepts.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use sea_orm::{DatabaseConnection, SqlxPostgresConnector};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::ConnectOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::config::db::{PoolSettings, PoolStrategy};
use crate::error::DbInfraError;
use crate::infra::db::overflow::{OverflowObserver, PoolEvent};

/// The pool parameters that survived strategy-specific filtering. A `None`
/// means the strategy rejects that knob and the pool keeps its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPlan {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub use_lifo: Option<bool>,
    pub test_before_acquire: bool,
}

/// Caller overrides merged over the settings-derived plan.
#[derive(Debug, Clone, Default)]
pub struct EngineOverrides {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout: Option<Duration>,
    pub application_name: Option<String>,
}

pub fn pool_plan(settings: &PoolSettings) -> PoolPlan {
    let recycle = Some(Duration::from_secs(settings.pool_recycle_secs));
    match settings.strategy {
        PoolStrategy::Queue => PoolPlan {
            max_connections: settings.pool_size + settings.pool_overflow,
            min_connections: 0,
            acquire_timeout: Some(Duration::from_secs(settings.pool_timeout_secs)),
            max_lifetime: recycle,
            idle_timeout: None,
            use_lifo: Some(settings.pool_lifo),
            test_before_acquire: settings.pool_pre_ping,
        },
        // one connection per thread; timeout, lifo and overflow do not apply
        PoolStrategy::SingletonThread => PoolPlan {
            max_connections: settings.pool_size.max(1),
            min_connections: 1,
            acquire_timeout: None,
            max_lifetime: recycle,
            idle_timeout: None,
            use_lifo: None,
            test_before_acquire: settings.pool_pre_ping,
        },
        // exactly one shared connection; pool_size does not apply either
        PoolStrategy::Static => PoolPlan {
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: None,
            max_lifetime: recycle,
            idle_timeout: None,
            use_lifo: None,
            test_before_acquire: settings.pool_pre_ping,
        },
        // no reuse: released connections are closed immediately
        PoolStrategy::Null => PoolPlan {
            max_connections: 1,
            min_connections: 0,
            acquire_timeout: None,
            max_lifetime: recycle,
            idle_timeout: Some(Duration::ZERO),
            use_lifo: None,
            test_before_acquire: settings.pool_pre_ping,
        },
        PoolStrategy::Assertion => PoolPlan {
            max_connections: 1,
            min_connections: 0,
            acquire_timeout: None,
            max_lifetime: recycle,
            idle_timeout: None,
            use_lifo: None,
            test_before_acquire: settings.pool_pre_ping,
        },
    }
}

pub fn build_pool_options(plan: &PoolPlan, overrides: &EngineOverrides) -> PgPoolOptions {
    let mut opts = PgPoolOptions::new()
        .max_connections(overrides.max_connections.unwrap_or(plan.max_connections))
        .min_connections(overrides.min_connections.unwrap_or(plan.min_connections))
        .test_before_acquire(plan.test_before_acquire);
    if let Some(timeout) = overrides.acquire_timeout.or(plan.acquire_timeout) {
        opts = opts.acquire_timeout(timeout);
    }
    if let Some(lifetime) = plan.max_lifetime {
        opts = opts.max_lifetime(lifetime);
    }
    if let Some(idle) = plan.idle_timeout {
        opts = opts.idle_timeout(idle);
    }
    opts
}

pub fn build_connect_options(
    settings: &PoolSettings,
    overrides: &EngineOverrides,
) -> Result<PgConnectOptions, DbInfraError> {
    let mut opts =
        PgConnectOptions::from_str(&settings.url).map_err(|e| DbInfraError::InvalidSetting {
            field: "url".to_owned(),
            value: sanitize_db_url(&settings.url),
            reason: e.to_string(),
        })?;

    let app_name = overrides
        .application_name
        .as_deref()
        .unwrap_or(&settings.application_name);
    opts = opts
        .application_name(app_name)
        .statement_cache_capacity(settings.query_cache_size);
    if !settings.connect_args.is_empty() {
        opts = opts.options(
            settings
                .connect_args
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
    }

    let level = if settings.echo {
        LevelFilter::Info
    } else {
        LevelFilter::Debug
    };
    Ok(opts.log_statements(level))
}

fn build_pool(
    settings: &PoolSettings,
    overrides: &EngineOverrides,
    observer: Option<Arc<OverflowObserver>>,
) -> Result<PgPool, DbInfraError> {
    let plan = pool_plan(settings);
    debug!(strategy = settings.strategy.as_str(), plan = ?plan, "building connection pool");

    let mut pool_opts = build_pool_options(&plan, overrides);
    if let Some(observer) = observer {
        let on_checkout = observer.clone();
        let on_checkin = observer;
        pool_opts = pool_opts
            .before_acquire(move |_conn, _meta| {
                let observer = on_checkout.clone();
                Box::pin(async move {
                    observer.observe(PoolEvent::Checkout);
                    Ok(true)
                })
            })
            .after_release(move |_conn, _meta| {
                let observer = on_checkin.clone();
                Box::pin(async move {
                    observer.observe(PoolEvent::Checkin);
                    Ok(true)
                })
            });
    }

    let connect_opts = build_connect_options(settings, overrides)?;
    Ok(pool_opts.connect_lazy_with(connect_opts))
}

/// Build an engine with the strategy-filtered base configuration merged with
/// the caller's overrides. The pool connects lazily.
pub fn create_engine(
    settings: &PoolSettings,
    overrides: EngineOverrides,
) -> Result<DatabaseConnection, DbInfraError> {
    let pool = build_pool(settings, &overrides, None)?;
    Ok(SqlxPostgresConnector::from_sqlx_postgres_pool(pool))
}

/// Build the process engine: overflow logging for the queue strategy, then a
/// bounded connectivity check so a dead database fails fast instead of at the
/// first real statement.
pub async fn setup_db(settings: &PoolSettings) -> Result<DatabaseConnection, DbInfraError> {
    let observer = (settings.strategy == PoolStrategy::Queue)
        .then(|| Arc::new(OverflowObserver::new(settings.pool_size)));
    let pool = build_pool(settings, &EngineOverrides::default(), observer.clone())?;
    if let Some(observer) = observer {
        observer.attach(pool.clone());
    }

    info!(
        url = %sanitize_db_url(&settings.url),
        strategy = settings.strategy.as_str(),
        "database engine configured"
    );

    let connect_timeout = Duration::from_secs(settings.connection_timeout_secs);
    retry_connection(
        || async {
            match tokio::time::timeout(connect_timeout, pool.acquire()).await {
                Ok(Ok(_conn)) => Ok(()),
                Ok(Err(e)) => Err(DbInfraError::Config {
                    message: format!("failed to connect to database: {e}"),
                }),
                Err(_) => Err(DbInfraError::Config {
                    message: format!(
                        "database connection timed out after {}s",
                        settings.connection_timeout_secs
                    ),
                }),
            }
        },
        5,
        500,
    )
    .await?;

    Ok(SqlxPostgresConnector::from_sqlx_postgres_pool(pool))
}

async fn retry_connection<T, F, Fut>(
    mut connect_fn: F,
    max_attempts: u32,
    interval_ms: u64,
) -> Result<T, DbInfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbInfraError>>,
{
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match connect_fn().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        "connection_retry=success attempts={} interval_ms={}",
                        attempt, interval_ms
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < max_attempts {
                    warn!(
                        "connection_retry=failed attempt={} max_attempts={} interval_ms={}",
                        attempt, max_attempts, interval_ms
                    );
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| DbInfraError::Config {
        message: "no error recorded after max attempts (this should not happen)".to_owned(),
    }))
}

/// Mask the password for lock keys and logging.
pub fn sanitize_db_url(url: &str) -> String {
    let Some(at) = url.find('@') else {
        return url.to_owned();
    };
    let auth = &url[..at];
    match auth.rfind(':') {
        // the scheme colon is followed by "//" and does not hide anything
        Some(colon) if !auth[colon..].starts_with("://") => {
            format!("{}:***{}", &auth[..colon], &url[at..])
        }
        _ => url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{build_pool_options, pool_plan, sanitize_db_url, EngineOverrides};
    use crate::config::db::{PoolSettings, PoolStrategy};

    fn settings_with(strategy: PoolStrategy) -> PoolSettings {
        PoolSettings {
            strategy,
            ..PoolSettings::default()
        }
    }

    #[test]
    fn queue_plan_uses_every_setting() {
        let plan = pool_plan(&settings_with(PoolStrategy::Queue));
        assert_eq!(plan.max_connections, 20); // size + overflow
        assert_eq!(plan.acquire_timeout, Some(Duration::from_secs(5)));
        assert_eq!(plan.max_lifetime, Some(Duration::from_secs(500)));
        assert_eq!(plan.use_lifo, Some(true));
        assert!(plan.test_before_acquire);
    }

    #[test]
    fn singleton_thread_plan_drops_timeout_lifo_and_overflow() {
        let plan = pool_plan(&settings_with(PoolStrategy::SingletonThread));
        assert_eq!(plan.acquire_timeout, None);
        assert_eq!(plan.use_lifo, None);
        // no overflow on top of the configured size
        assert_eq!(plan.max_connections, 10);
    }

    #[test]
    fn single_connection_strategies_also_drop_pool_size() {
        for strategy in [
            PoolStrategy::Static,
            PoolStrategy::Null,
            PoolStrategy::Assertion,
        ] {
            let plan = pool_plan(&settings_with(strategy));
            assert_eq!(plan.max_connections, 1, "{strategy:?}");
            assert_eq!(plan.acquire_timeout, None, "{strategy:?}");
            assert_eq!(plan.use_lifo, None, "{strategy:?}");
        }
    }

    #[test]
    fn null_plan_never_keeps_idle_connections() {
        let plan = pool_plan(&settings_with(PoolStrategy::Null));
        assert_eq!(plan.idle_timeout, Some(Duration::ZERO));
    }

    #[test]
    fn overrides_win_over_the_plan() {
        let plan = pool_plan(&settings_with(PoolStrategy::Queue));
        let opts = build_pool_options(
            &plan,
            &EngineOverrides {
                max_connections: Some(3),
                min_connections: Some(1),
                ..EngineOverrides::default()
            },
        );
        assert_eq!(opts.get_max_connections(), 3);
        assert_eq!(opts.get_min_connections(), 1);
    }

    #[test]
    fn plan_values_reach_the_pool_options() {
        let plan = pool_plan(&settings_with(PoolStrategy::Queue));
        let opts = build_pool_options(&plan, &EngineOverrides::default());
        assert_eq!(opts.get_max_connections(), 20);
        assert_eq!(opts.get_acquire_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn sanitize_masks_the_password_only() {
        assert_eq!(
            sanitize_db_url("postgresql://convo:secret@db:5432/convo"),
            "postgresql://convo:***@db:5432/convo"
        );
        assert_eq!(
            sanitize_db_url("postgresql://convo@db/convo"),
            "postgresql://convo@db/convo"
        );
        assert_eq!(
            sanitize_db_url("postgresql://localhost/convo"),
            "postgresql://localhost/convo"
        );
    }
}
