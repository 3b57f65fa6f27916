//! Basic Observer usage example demonstrating core functionality.

use observer::prelude::*;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("observer=debug")
        .init();

    println!("Observer Basic Example");

    let observer = Observer::new();

    observer.on(
        "user:*",
        handler(|_ctx, args: &[Arg]| {
            println!("user event with {:?}", &args[1..]);
        }),
        None,
        (),
    );

    observer.once(
        "user:login",
        handler(|_ctx, args: &[Arg]| {
            println!("first login: {}", args[1].as_str().unwrap_or("?"));
        }),
        None,
        (),
    );

    observer.buffer(
        200,
        "order:created",
        handler(|_ctx, args: &[Arg]| {
            println!("order {:?} (at most one report per 200ms)", args[1]);
        }),
        None,
        (),
    );

    observer
        .broadcast("user:login", args!["alice"])
        .broadcast("user:login", args!["bob"])
        .broadcast("order:created", args![1])
        .broadcast("order:created", args![2]);

    // Relay order events to an audit observer.
    let audit = Observer::new();
    audit.on(
        "order:*",
        handler(|_ctx, args: &[Arg]| println!("audit saw {:?}", &args[1..])),
        None,
        (),
    );
    observer.relay_events(&audit, ["order:shipped"]);
    observer.broadcast("order:shipped", args![1]);

    // A delayed listener runs on the timer's scheduler thread when no runtime is present.
    observer.delay(
        50,
        "report",
        handler(|_ctx, _args| println!("delayed report")),
        None,
        (),
    );
    observer.broadcast("report", Vec::new());
    std::thread::sleep(Duration::from_millis(100));

    observer.on("before:destroy", handler(|_, _| false), None, ());
    println!("destroy allowed: {}", observer.destroy());

    observer.purge_observers(Some("before:destroy"));
    println!("destroy allowed: {}", observer.destroy());
}
