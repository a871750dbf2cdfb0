//! Subcommand handlers wiring the CLI configuration to the niimbot library.

use std::path::PathBuf;

use niimbot::info::inspect;
use niimbot::{BleConnection, Discovery, ModelProfile, PrintJob, PrintSession};
use tokio_util::sync::CancellationToken;

use crate::config::CliConfig;
use crate::raster;

/// Physical label dimensions from `--label-size WxH`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelSize {
    pub width_mm: f32,
    pub height_mm: f32,
}

pub fn parse_label_size(s: &str) -> Result<LabelSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT in mm, got '{s}'"))?;
    let parse = |v: &str| -> Result<f32, String> {
        let mm: f32 = v.trim().parse().map_err(|_| format!("invalid size '{v}'"))?;
        if mm > 0.0 {
            Ok(mm)
        } else {
            Err(format!("size must be positive, got '{v}'"))
        }
    };
    Ok(LabelSize {
        width_mm: parse(w)?,
        height_mm: parse(h)?,
    })
}

/// Print-specific arguments that are not persisted settings.
pub struct PrintArgs {
    pub image: PathBuf,
    pub quantity: u16,
    pub label_size: Option<LabelSize>,
    pub dither: bool,
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

pub async fn scan(config: &CliConfig) -> anyhow::Result<()> {
    let mut ble = BleConnection::new().await?;
    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let devices = Discovery::new(&mut ble)
        .discover_until(config.scan_timeout(), &token)
        .await?;

    if devices.is_empty() {
        println!("No printers found");
        return Ok(());
    }
    println!("{:<24} {:<40} {:>6}  MODEL", "NAME", "ADDRESS", "RSSI");
    for device in devices {
        println!(
            "{:<24} {:<40} {:>6}  {}",
            device.name,
            device.address,
            device.signal_strength,
            device.model.unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn print(config: &CliConfig, args: PrintArgs) -> anyhow::Result<()> {
    let address = config.require_address()?;
    let profile = ModelProfile::resolve(&config.model)?;

    let page = raster::load_label(
        &args.image,
        profile.max_width_px,
        config.black_point,
        args.dither,
    )?;
    let mut job = PrintJob::new(page)
        .with_density(config.density)
        .with_quantity(args.quantity);
    if let Some(size) = args.label_size {
        job = job.with_label_size_mm(size.width_mm, size.height_mm);
    }

    let ble = BleConnection::new().await?;
    let mut session = PrintSession::new(ble, address, &config.model, config.session_config())?
        .with_progress(|p| {
            tracing::info!(
                page = p.page,
                print = p.print_percent,
                feed = p.feed_percent,
                "Printing"
            );
        });
    cancel_on_ctrl_c(session.cancel_token());

    match session.run(job).await {
        Ok(report) => {
            println!(
                "Printed {} label(s) on {} in {:.1}s",
                report.pages,
                report.model,
                report.elapsed.as_secs_f32()
            );
            Ok(())
        }
        Err(err) => {
            let hint = if err.is_retryable() {
                "retrying may help"
            } else {
                "retrying will not help without changes"
            };
            let reason = err.fail_reason();
            Err(anyhow::Error::new(err).context(format!("print failed: {reason:?} ({hint})")))
        }
    }
}

pub async fn info(config: &CliConfig) -> anyhow::Result<()> {
    let address = config.require_address()?;
    let mut ble = BleConnection::new().await?;
    let device = inspect(&mut ble, address, &config.session_config()).await?;
    print!("{device}");
    Ok(())
}
