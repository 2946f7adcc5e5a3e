//! Dump every new dive off an Oceanic VTPro-family computer to stdout.
//!
//! The crate ships no serial port binding (§1 Non-goals), so this demo
//! expects the caller to supply one; set `DIVE_PORT` to a path understood
//! by whatever `SerialTransport` you wire up in `open_port` below before
//! running it for real. As shipped, `open_port` is left unimplemented so
//! the demo documents the integration point rather than pretending to talk
//! to a real serial line.

use divelog_core::oceanic::vtpro::VtproDevice;
use divelog_core::transport::SerialTransport;
use divelog_core::{Device, Event};

fn open_port(_path: &str) -> divelog_core::Result<Box<dyn SerialTransport>> {
    Err(divelog_core::Error::Unsupported)
}

fn main() -> divelog_core::Result<()> {
    env_logger::init();

    let path = std::env::var("DIVE_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".into());
    let port = open_port(&path)?;
    let mut device = VtproDevice::open(port)?;

    device.set_listener(Box::new(|event: Event| {
        if let Event::Progress(p) = event {
            eprint!("\rfetching... {}/{} bytes", p.current, p.maximum);
        }
    }));

    let mut count = 0u32;
    device.foreach(&mut |dive, fingerprint| {
        count += 1;
        println!(
            "dive {}: {} bytes, fingerprint {:02x?}",
            count,
            dive.len(),
            fingerprint
        );
        true
    })?;
    eprintln!();

    device.close()?;
    println!("done, {} new dives", count);
    Ok(())
}
