//! Basic usage example for the watchdog timer

use watchdog_timer::{Duration, GetterOptions, Registry, Timer, TimerError, TimerOptions, Verbosity};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let registry = Registry::global();
    let options = TimerOptions::new().id("pipeline").verbosity(Verbosity::new(22));

    // Create (or retrieve) a named watchdog with a 1 second deadline
    let watchdog = registry
        .get_by_id("pipeline", GetterOptions::default().duration(1000).timer(options))?
        .ok_or("registry refused to create the timer")?;

    watchdog.launch_timer(|err| println!("Pipeline stalled: {err}"), &[&"pipeline started"])?;

    // Each stage finishes well within the deadline and signals liveness
    for stage in 1..=3 {
        tokio::time::sleep(Duration::from_millis(600)).await;
        watchdog.update(&[&"finished stage", &stage]);
    }
    watchdog.done(&[&"pipeline finished"]);

    // Race a slow operation against a short deadline
    let racer = Timer::new(registry, Some(300), TimerOptions::new().verbosity(Verbosity::new(12)))?;
    let outcome = racer
        .launch_timer_future(
            async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, TimerError>("slow result")
            },
            &[],
        )
        .await;
    match outcome {
        Ok(value) => println!("Operation finished: {value}"),
        Err(err) => println!("Operation abandoned: {err}"),
    }

    // A timer left running is forced down with the rest of the registry
    let forgotten = Timer::new(registry, Some(10_000), TimerOptions::default())?;
    forgotten.launch_timer(|_| println!("Forgotten timer aborted during teardown"), &[])?;
    registry.destroy_all(true);

    println!("All timers released: {}", registry.is_empty());
    Ok(())
}
