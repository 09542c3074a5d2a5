use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The device's update channel lives on its own port, away from the
/// stream listener.
const UPDATE_PORT: u16 = 8081;

#[derive(Parser)]
#[command(name = "ota-tool")]
#[command(about = "ESP32-CAM Repeater firmware update tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Device IP address
    #[arg(value_name = "IP")]
    ip: Option<String>,

    /// Firmware file to upload
    #[arg(
        short,
        long,
        default_value = "target/xtensa-esp32-espidf/release/esp32-cam-repeater"
    )]
    firmware: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Query device status (version, heap, uptime, update phase)
    Status {
        /// Device IP address
        ip: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Status { ip }) => {
            query_status(ip);
        }
        None => {
            if let Some(ip) = cli.ip {
                update_device(&ip, &cli.firmware);
            } else {
                println!("{}", "ESP32-CAM Repeater OTA Tool".bold().blue());
                println!("\nUsage:");
                println!(
                    "  {} <IP>               Upload firmware to device",
                    "ota-tool".green()
                );
                println!(
                    "  {} status <IP>       Query device status",
                    "ota-tool".green()
                );
                println!("\nExamples:");
                println!("  ota-tool 192.168.1.100");
                println!("  ota-tool status 192.168.4.1");
            }
        }
    }
}

fn query_status(ip: &str) {
    let client = match Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "❌ HTTP client error:".red(), e);
            return;
        }
    };

    let url = format!("http://{}:{}/status", ip, UPDATE_PORT);
    match client.get(&url).send() {
        Ok(response) if response.status().is_success() => {
            match response.json::<serde_json::Value>() {
                Ok(json) => {
                    println!("{} {}", "Device:".cyan(), ip);
                    println!(
                        "  version:   {}",
                        json["version"].as_str().unwrap_or("unknown")
                    );
                    println!("  free heap: {} bytes", json["free_heap"]);
                    println!("  uptime:    {} ms", json["uptime_ms"]);
                    println!(
                        "  update:    {}",
                        json["update"].as_str().unwrap_or("unknown")
                    );
                }
                Err(e) => println!("{} {}", "❌ Bad status payload:".red(), e),
            }
        }
        Ok(response) => {
            println!("{} HTTP {}", "❌ Status failed:".red(), response.status());
        }
        Err(e) => {
            println!("{} {}", "❌ Error:".red(), e);
        }
    }
}

fn update_device(ip: &str, firmware_path: &Path) {
    if !firmware_path.exists() {
        println!(
            "{} {}",
            "❌ Firmware not found:".red(),
            firmware_path.display()
        );
        return;
    }

    if upload_firmware(ip, firmware_path) {
        println!("\n✨ {}", "OTA update completed successfully!".green());
    } else {
        println!("\n{}", "❌ OTA update failed!".red());
        std::process::exit(1);
    }
}

fn upload_firmware(ip: &str, firmware_path: &Path) -> bool {
    let firmware_data = match fs::read(firmware_path) {
        Ok(data) => data,
        Err(e) => {
            println!("❌ Failed to read firmware: {}", e);
            return false;
        }
    };

    let file_size = firmware_data.len();
    println!("\n📤 {} {}:{}", "Updating".cyan(), ip, UPDATE_PORT);
    println!(
        "   Firmware: {} bytes ({:.2} MB)",
        file_size,
        file_size as f64 / 1024.0 / 1024.0
    );

    let client = match Client::builder().timeout(Duration::from_secs(120)).build() {
        Ok(client) => client,
        Err(e) => {
            println!("❌ HTTP client error: {}", e);
            return false;
        }
    };

    let pb = ProgressBar::new(file_size as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let url = format!("http://{}:{}/update", ip, UPDATE_PORT);
    match client
        .post(&url)
        .header("Content-Length", file_size.to_string())
        .body(firmware_data)
        .send()
    {
        Ok(response) => {
            pb.finish_and_clear();
            if response.status().is_success() {
                println!(
                    "   {} Upload successful! Device will restart.",
                    "✅".green()
                );
                true
            } else {
                let status = response.status();
                let body = response.text().unwrap_or_default();
                println!("   {} Upload failed: HTTP {} {}", "❌".red(), status, body);
                false
            }
        }
        Err(e) => {
            pb.finish_and_clear();
            println!("   {} Error: {}", "❌".red(), e);
            false
        }
    }
}
