//! The taglog listener: binds a UDP endpoint, receives JSON datagrams
//! from whatever positioning rig is under test, and appends each one to a
//! per-run CSV file under the log root. Ctrl-c shuts it down cleanly.
//!
//! ```text
//! RUST_LOG=info listener --ip 127.0.0.1 --port 5005 --log-root logs
//! ```

use clap::Parser;
use log::info;
use std::{
    error::Error,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use taglog::{args::ListenerArgs, receiver::Receiver, row_logger::RowLogger};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = ListenerArgs::parse();

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut logger = RowLogger::with_timestamped_path(&args.log_root);
    info!("logging to {}", logger.path().display());

    let receiver = Receiver::bind((args.ip.as_str(), args.port))?;
    receiver.run(&mut logger, &running)?;

    info!("shut down cleanly");
    Ok(())
}
