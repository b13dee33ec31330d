//! Toggle behaviour lives in its own test binary because the environment is
//! read once per process.

use std::path::Path;

#[test]
fn disabled_toggle_makes_observe_an_identity_wrapper() {
    // SAFETY: set before any other thread reads the environment; this is the
    // only test in this binary.
    unsafe { std::env::set_var(kronicler::config::ENABLED_ENV, "false") };

    assert!(!kronicler::capture_enabled());

    let mut acc: u64 = 0;
    for i in 0..10_000u64 {
        acc += kronicler::observe("wrapped", || i);
    }
    assert_eq!(acc, (0..10_000u64).sum());

    // The database was never constructed, so no data directory and no rows.
    assert!(!Path::new(kronicler::config::DEFAULT_DIRECTORY).exists());
}
