//! Progress output using indicatif

use std::time::Duration;

use flashmon_core::chip::ChipFamily;
use flashmon_serial::{BootstrapProgress, SessionProgress, Stage, Step};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Create a progress bar with custom phase message
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn create_bar(&mut self, total: u64, phase: &str) {
        self.finish_quiet();
        let pb = self.multi.add(
            create_progress_bar_with_phase(total, phase)
                .unwrap_or_else(|_| ProgressBar::new(total)),
        );
        self.current_bar = Some(pb);
    }

    fn spin(&mut self, message: &str) {
        if let Some(pb) = &self.current_bar {
            if pb.length().is_none() {
                pb.set_message(message.to_string());
                return;
            }
        }
        self.finish_quiet();
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn set_position(&self, pos: u64) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(pos);
        }
    }

    fn finish(&mut self, message: &str) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(message.to_string());
        }
    }

    fn finish_quiet(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_and_clear();
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IndicatifProgress {
    fn drop(&mut self) {
        // A failed step keeps its bar on screen
        if let Some(pb) = self.current_bar.take() {
            pb.abandon();
        }
    }
}

impl SessionProgress for IndicatifProgress {
    fn step(&mut self, step: Step) {
        let message = match step {
            Step::Connect => "Connecting to monitor...",
            Step::Identify => "Identifying flash...",
            Step::Erase => "Erasing flash...",
            Step::TotalAck => "Declaring transfer...",
            Step::CrcAck => "Running CRC...",
            Step::GetCrc => "Reading CRC...",
            Step::TerminateAck => "Terminating session...",
            Step::ResetAck => "Resetting target...",
            _ => return,
        };
        self.spin(message);
    }

    fn chip_identified(&mut self, family: &'static ChipFamily) {
        self.finish(&format!("Found {} {}", family.vendor, family.name));
    }

    fn transfer_started(&mut self, total: u64) {
        self.create_bar(total, "Programming");
    }

    fn transfer_progress(&mut self, sent: u64) {
        self.set_position(sent);
    }

    fn transfer_finished(&mut self) {
        self.finish("Programming complete");
    }

    fn crc_read(&mut self, digits: &str) {
        self.finish(&format!("CRC {}", digits));
    }
}

impl BootstrapProgress for IndicatifProgress {
    fn identified(&mut self, id: u8) {
        self.multi
            .println(format!("Boot-strap loader answered, CPU code {:02X}h", id))
            .ok();
    }

    fn stage_started(&mut self, stage: Stage, len: usize) {
        let phase = match stage {
            Stage::One => "Stage 1",
            Stage::Two => "Stage 2",
            Stage::Three => "Stage 3 (monitor)",
        };
        self.create_bar(len as u64, phase);
    }

    fn stage_progress(&mut self, sent: usize) {
        self.set_position(sent as u64);
    }

    fn stage_finished(&mut self, stage: Stage) {
        self.finish(&format!("{} sent", stage));
    }
}
