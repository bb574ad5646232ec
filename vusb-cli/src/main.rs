// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Binary entry point (§6): wires a [`vusb_bus::Follower`] and
//! [`vusb_decoders::DecoderRegistry`] into [`vusb_bus::EventBus`]
//! consumers, optionally driving [`vusb_diff::DiffEngine`] when `--diff`
//! is given.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use vusb_bus::{EventBus, Follower};
use vusb_decoders::DecoderRegistry;
use vusb_diff::{CancelToken, CorrelationMap, DiffEngine, Side};
use vusb_model::{Event, Termination, Transaction};

/// A single log file, or two when `--diff` is given, matching the core's
/// CLI surface: everything beyond this belongs to the interactive UI
/// collaborator (§1, §6).
#[derive(Parser)]
#[command(name = "vusb-analyzer")]
#[command(about = "Decodes a USB bus-capture log, optionally diffing it against a second capture")]
struct Args {
    /// Path to the log file to parse. Extension selects the format (§6):
    /// `.xml` Ellisys, `.mon` usbmon, `.tslog` timestamp log, anything
    /// else VMX. A trailing `.gz` is transparently unwrapped.
    path: PathBuf,

    /// A second log file to align against the first via the diff engine.
    #[arg(long = "diff", value_name = "FILE")]
    diff: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let primary = match decode_file(&args.path) {
        Ok(transactions) => transactions,
        Err(_) => return ExitCode::FAILURE,
    };

    match &args.diff {
        None => {
            for t in &primary {
                println!("{}", format_transaction(t));
            }
            ExitCode::SUCCESS
        }
        Some(other_path) => {
            let other = match decode_file(other_path) {
                Ok(transactions) => transactions,
                Err(_) => return ExitCode::FAILURE,
            };
            run_diff(&primary, &other);
            ExitCode::SUCCESS
        }
    }
}

/// Runs a Follower + DecoderRegistry pipeline over one file to completion,
/// returning every decoded transaction. Exit code 1 on an unreadable
/// input (§6).
fn decode_file(path: &PathBuf) -> Result<Vec<Transaction>, ()> {
    let handle = match Follower::new(path).spawn() {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to open input");
            eprintln!("vusb-analyzer: cannot read {}: {e}", path.display());
            return Err(());
        }
    };

    let mut bus = EventBus::new();
    let rx = bus.subscribe();
    let mut registry = DecoderRegistry::new();

    for event in handle.events.iter() {
        if let Event::Terminal(Termination::Io(detail)) = &event {
            tracing::error!(path = %path.display(), %detail, "input stream closed unexpectedly");
        }
        let terminal = matches!(event, Event::Terminal(_));
        bus.publish(event);
        if terminal {
            break;
        }
    }
    handle.join();

    let mut transactions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::Transaction(mut t) = event {
            registry.handle_event(&mut t);
            transactions.push(t);
        }
    }
    Ok(transactions)
}

fn format_transaction(t: &Transaction) -> String {
    let mut line = format!(
        "{:>10.6} dev={} {:<8} {} {}",
        t.meta.timestamp,
        t.dev,
        t.get_transfer_string(),
        t.dir.map(|d| d.to_string()).unwrap_or_default(),
        t.status,
    );
    if !t.decoded_summary.is_empty() {
        line.push_str("  ");
        line.push_str(&t.decoded_summary);
    }
    line
}

/// Computes the diff over both decoded streams' fingerprints and prints
/// each matching block alongside the resulting correlation (§4.5).
fn run_diff(a: &[Transaction], b: &[Transaction]) {
    let fingerprints_a: Vec<_> = a.iter().map(vusb_diff::fingerprint).collect();
    let fingerprints_b: Vec<_> = b.iter().map(vusb_diff::fingerprint).collect();

    let mut engine = DiffEngine::new();
    let cancel = CancelToken::new();
    let mut correlation = CorrelationMap::new();
    let mut block_count = 0usize;

    engine.run(&fingerprints_a, &fingerprints_b, &cancel, |block| {
        block_count += 1;
        correlation.record_block(block);
        println!(
            "match: A[{}..{}] == B[{}..{}] ({} transactions)",
            block.i,
            block.i + block.n,
            block.j,
            block.j + block.n,
            block.n
        );
    });

    println!(
        "diff complete: {block_count} matching block(s), {} correlated transaction(s), progress={:.2}",
        correlation.len(),
        engine.progress()
    );

    for (idx, t) in a.iter().enumerate() {
        let peer = correlation.peer(Side::A, idx).map(|(_, j)| j);
        let marker = match peer {
            Some(j) => format!(" <-> B[{j}]"),
            None => String::new(),
        };
        println!("A[{idx}] {}{marker}", format_transaction(t));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_transaction_includes_decoded_summary() {
        let mut t = Transaction::new(vusb_model::Direction::Down, 0.5);
        t.dev = 3;
        t.endpt = 0x02;
        t.decoded_summary = "Storage Command: INQUIRY".to_string();
        let line = format_transaction(&t);
        assert!(line.contains("INQUIRY"));
        assert!(line.contains("dev=3"));
    }
}
