//! Devices command
//!
//! Prints every compiled-in backend with its platforms and devices. The
//! indices are the ones `--platform` and `--device` accept.

use anyhow::Result;
use histeq_compute::{describe_backends, detect_backends, format_device_listing, list_devices};
use tracing::{trace, warn};

pub fn run(verbose: u8) -> Result<()> {
    trace!("devices::run");

    if verbose > 0 {
        print!("{}", describe_backends());
        println!();
    }

    for info in detect_backends() {
        println!("== {} ==", info.name);
        if !info.available {
            println!("not available");
            continue;
        }
        match list_devices(info.backend) {
            Ok(platforms) => print!("{}", format_device_listing(&platforms)),
            Err(e) => {
                warn!(backend = info.name, error = %e, "device listing failed");
                println!("listing failed: {e}");
            }
        }
    }
    Ok(())
}
