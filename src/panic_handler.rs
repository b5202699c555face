use log::error;
use std::panic;

/// Debug builds get readable backtraces, release builds a crash report file
/// and a short message for the user.
pub fn initialize_panic_handler() {
    #[cfg(debug_assertions)]
    better_panic::install();

    #[cfg(not(debug_assertions))]
    human_panic::setup_panic!();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        error!("Panic: {panic_info}");
        default_hook(panic_info);
        std::process::exit(1);
    }));
}
