//! Load Testing Tool
//!
//! Hammers one event with concurrent registrations against the in-memory
//! store and checks that confirmed seats never exceed capacity.
//!
//! Run with: cargo run --bin load_test --release -- --requests 5000 --capacity 100

use std::sync::Arc;
use std::time::Instant;

use city_events::admission::{AdmissionController, CreateEventCommand, RegisterCommand};
use city_events::config::AdmissionSettings;
use city_events::domain::{DomainError, RegistrationStatus};
use city_events::notifications::{LogSink, NotificationDispatcher, NotificationWorker};
use city_events::store::InMemoryStore;

fn arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Default)]
struct Tally {
    confirmed: u64,
    waitlisted: u64,
    rejected: u64,
    contended: u64,
    failed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let requests: u64 = arg(&args, "--requests", 5_000);
    let capacity: u32 = arg(&args, "--capacity", 100);
    let waitlist = args.iter().any(|a| a == "--waitlist");

    println!(
        "Load Test - {} concurrent registrations for {} seats (waitlist: {})",
        requests, capacity, waitlist
    );

    let (notifier, rx) = NotificationDispatcher::channel(requests as usize + 16);
    let worker = NotificationWorker::new(rx, LogSink).start();
    let controller = AdmissionController::new(
        Arc::new(InMemoryStore::new()),
        notifier,
        AdmissionSettings::default(),
    );

    let mut command = CreateEventCommand::new("load test", Some(capacity));
    if waitlist {
        command = command.with_waitlist();
    }
    let event = controller.create_event(command).await?;

    let start = Instant::now();
    let mut handles = Vec::with_capacity(requests as usize);
    for _ in 0..requests {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            controller
                .request_registration(RegisterCommand::new(event.id, uuid::Uuid::new_v4(), 1))
                .await
        }));
    }

    let mut tally = Tally::default();
    for handle in handles {
        match handle.await? {
            Ok(result) if result.status == RegistrationStatus::Confirmed => tally.confirmed += 1,
            Ok(_) => tally.waitlisted += 1,
            Err(e) => match e.as_domain() {
                Some(DomainError::CapacityExceeded { .. }) => tally.rejected += 1,
                Some(DomainError::Contention { .. }) => tally.contended += 1,
                _ => tally.failed += 1,
            },
        }
    }
    let elapsed = start.elapsed();

    let availability = controller.availability(event.id).await?;
    drop(controller);
    let notified = worker.await?;

    let rate = requests as f64 / elapsed.as_secs_f64();

    println!("\n=== Load Test Results ===");
    println!("Requests: {}", requests);
    println!("Confirmed: {}", tally.confirmed);
    println!("Waitlisted: {}", tally.waitlisted);
    println!("Rejected (full): {}", tally.rejected);
    println!("Contention: {}", tally.contended);
    println!("Other failures: {}", tally.failed);
    println!("Notifications delivered: {}", notified);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Rate: {:.0} requests/sec", rate);

    if availability.confirmed_seats > capacity || tally.confirmed > u64::from(capacity) {
        anyhow::bail!(
            "capacity invariant violated: {} confirmed seats for capacity {}",
            availability.confirmed_seats,
            capacity
        );
    }
    println!("Capacity invariant held ({} / {})", availability.confirmed_seats, capacity);

    Ok(())
}
