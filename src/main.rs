//! resilience-demo
//!
//! Drives the circuit breaker and the compensable workflow through the
//! scenarios they were designed for: a flaky dependency, a booking that has
//! to be undone, and an order pipeline that combines both.
//!
//! ```text
//! breaker:  risky call ─▶ CircuitBreaker ─▶ fail, fail, fail, blocked
//! saga:     flight ─▶ hotel ─▶ car       (failure ⇒ undo in reverse)
//! order:    inventory (breaker) ─▶ payment (retry) ─▶ notify
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use resilience_patterns::config::{load_config, ResilienceConfig};
use resilience_patterns::observability::{logging, metrics};
use resilience_patterns::resilience::{retry, CircuitBreaker, CompensableWorkflow, RetryPolicy};

#[derive(Parser)]
#[command(name = "resilience-demo")]
#[command(about = "Exercise the circuit breaker and compensable workflow", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics before exiting.
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send failing calls through a breaker until it opens
    Breaker {
        /// Number of failing calls to make.
        #[arg(short = 'n', long, default_value_t = 4)]
        failures: u32,
        /// Wait this long afterwards, then make one healthy trial call.
        #[arg(long)]
        wait_ms: Option<u64>,
        /// Print the final breaker state as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Book a flight, hotel and car, rolling back on failure
    Saga {
        /// Index of the booking step that fails (0 = flight).
        #[arg(long)]
        fail_at: Option<usize>,
    },
    /// Place orders through an inventory breaker and a retried payment
    Order {
        /// Number of orders to place.
        #[arg(short = 'n', long, default_value_t = 1)]
        orders: u32,
        /// Make every inventory check fail.
        #[arg(long)]
        inventory_down: bool,
    },
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
struct ServiceError(String);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };
    logging::init_logging(&config.observability)?;

    let metrics_handle = if cli.print_metrics || config.observability.metrics_enabled {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    tracing::debug!(
        failure_threshold = config.circuit_breaker.failure_threshold,
        reset_timeout_ms = config.circuit_breaker.reset_timeout_ms,
        max_attempts = config.retries.max_attempts,
        "Configuration ready"
    );

    match cli.command {
        Commands::Breaker {
            failures,
            wait_ms,
            json,
        } => run_breaker(&config, failures, wait_ms, json).await?,
        Commands::Saga { fail_at } => {
            tokio::task::spawn_blocking(move || run_saga(fail_at)).await?;
        }
        Commands::Order {
            orders,
            inventory_down,
        } => {
            tokio::task::spawn_blocking(move || run_orders(&config, orders, inventory_down))
                .await?;
        }
    }

    if let Some(handle) = metrics_handle {
        println!("{}", handle.render());
    }
    Ok(())
}

async fn risky_call() -> Result<&'static str, ServiceError> {
    Err(ServiceError("Oops".into()))
}

async fn run_breaker(
    config: &ResilienceConfig,
    failures: u32,
    wait_ms: Option<u64>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let breaker = CircuitBreaker::new("risky-service", &config.circuit_breaker);

    for i in 1..=failures {
        match breaker.call_async(risky_call).await {
            Ok(value) => println!("call {i}: {value}"),
            Err(e) if e.is_circuit_open() => println!("call {i}: Circuit open, call blocked"),
            Err(e) => println!("call {i}: Call failed ({e})"),
        }
    }

    if let Some(wait_ms) = wait_ms {
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        match breaker
            .call_async(|| async { Ok::<_, ServiceError>("recovered") })
            .await
        {
            Ok(value) => println!("trial: {value}"),
            Err(e) => println!("trial: {e}"),
        }
    }

    let snapshot = breaker.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!(
            "breaker '{}' is {} ({} of {} failures)",
            snapshot.name, snapshot.state, snapshot.failure_count, snapshot.failure_threshold
        );
    }
    Ok(())
}

fn run_saga(fail_at: Option<usize>) {
    let bookings = [("flight", "Flight"), ("hotel", "Hotel"), ("car", "Car")];

    let mut saga = CompensableWorkflow::new("booking");
    for (index, (step, label)) in bookings.into_iter().enumerate() {
        saga.add_named_step(
            step,
            move || {
                if fail_at == Some(index) {
                    return Err(ServiceError(format!("{label} unavailable")));
                }
                println!("{label} booked");
                Ok(())
            },
            move || {
                println!("{label} canceled");
                Ok(())
            },
        );
    }

    match saga.execute() {
        Ok(report) => println!(
            "Success ({} steps, execution {})",
            report.steps_completed, report.execution_id
        ),
        Err(failure) => println!("Failed, rolled back: {failure} ({})", failure.source),
    }
}

/// Price after the seasonal 10% discount.
fn order_total(prices: &[f64]) -> f64 {
    prices.iter().sum::<f64>() * 0.9
}

fn run_orders(config: &ResilienceConfig, orders: u32, inventory_down: bool) {
    let inventory = CircuitBreaker::new("inventory", &config.circuit_breaker);
    let payments = RetryPolicy::from(&config.retries);

    for order in 1..=orders {
        let total = order_total(&[100.0]);
        let mut workflow = CompensableWorkflow::new(format!("order-{order}"));

        workflow
            .add_named_step(
                "reserve-inventory",
                || {
                    inventory
                        .call(|| {
                            if inventory_down {
                                Err(ServiceError("inventory service unreachable".into()))
                            } else {
                                Ok(())
                            }
                        })
                        .map_err(|e| ServiceError(e.to_string()))
                },
                || {
                    println!("order {order}: inventory released");
                    Ok(())
                },
            )
            .add_named_step(
                "charge-payment",
                || {
                    retry(&payments, |_| true, |attempt| {
                        if attempt == 1 {
                            return Err(ServiceError("payment gateway timeout".into()));
                        }
                        println!("order {order}: processing ${total:.2} via credit card");
                        Ok(())
                    })
                },
                || {
                    println!("order {order}: payment refunded");
                    Ok(())
                },
            )
            .add_named_step(
                "notify",
                || {
                    println!("order {order}: customer Alice notified, order is now Processed");
                    println!("order {order}: warehouse notified, order is now Processed");
                    Ok(())
                },
                || Ok(()),
            );

        match workflow.execute() {
            Ok(_) => println!("order {order}: completed"),
            Err(failure) => println!("order {order}: {failure} ({})", failure.source),
        }
    }

    let snapshot = inventory.snapshot();
    println!(
        "inventory breaker is {} after {} order(s)",
        snapshot.state, orders
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_takes_failure_count() {
        let cli = Cli::try_parse_from(["resilience-demo", "breaker", "--failures", "3", "--json"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Breaker {
                failures: 3,
                wait_ms: None,
                json: true
            }
        ));

        let short = Cli::try_parse_from(["resilience-demo", "breaker", "-n", "2"]).unwrap();
        assert!(matches!(short.command, Commands::Breaker { failures: 2, .. }));
        assert!(Cli::try_parse_from(["resilience-demo", "breaker", "--calls", "2"]).is_err());
    }
}
