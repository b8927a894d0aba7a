//! Demo target: build with
//!
//! ```sh
//! HOOKBUILD_CONFIG=demos/concat-demo/hookpoints.yaml hookbuild build -p concat-demo
//! ```
//!
//! then run the produced binary. Without instrumentation the program still
//! runs; it just reports that no hooks are present.

mod text;

use hookbuild_rt::{Epilog, Prolog2};

fn install_hooks() {
    if let Err(e) = hookbuild_rt::health(hookbuild_rt::ABI_VERSION) {
        println!("(running uninstrumented: {e})");
        return;
    }

    let prolog: Prolog2<String, String, String> = Box::new(|a: &String, b: &String| {
        println!("prolog: concat({a:?}, {b:?})");
        let epilog: Epilog<String> = Box::new(|r: &String| {
            println!("epilog: concat -> {r:?}");
        });
        (Some(epilog), None)
    });
    match hookbuild_rt::do_hook("main::text::concat", Box::new(prolog)) {
        Ok(()) => println!("hook attached to main::text::concat"),
        Err(e) => println!("attach failed: {e}"),
    }
}

fn main() {
    install_hooks();

    let joined = text::concat("hook".to_string(), "build".to_string());
    println!("concat = {joined}");

    let mut counter = text::Counter::new();
    for i in 1..=3 {
        counter.add(i);
    }
    println!("counter = {}", counter.add(0));

    if let Err(e) = hookbuild_rt::undo_hook("main::text::concat") {
        println!("(detach skipped: {e})");
    }
    println!("concat = {}", text::concat("quiet".into(), " now".into()));
}
