use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Read WiFi configuration if it exists
    let wifi_config_path = "wifi_config.h";
    if Path::new(wifi_config_path).exists() {
        let contents = fs::read_to_string(wifi_config_path)?;
        emit_define(&contents, "STA_SSID");
        emit_define(&contents, "STA_PASSWORD");
        emit_define(&contents, "AP_SSID");
        emit_define(&contents, "AP_PASSWORD");
    } else {
        println!("cargo:rustc-env=STA_SSID=");
        println!("cargo:rustc-env=STA_PASSWORD=");
        println!("cargo:rustc-env=AP_SSID=esp32cam-repeater");
        println!("cargo:rustc-env=AP_PASSWORD=");
        println!("cargo:warning=wifi_config.h not found! Copy wifi_config.h.example to wifi_config.h and add your credentials.");
    }

    Ok(())
}

fn emit_define(contents: &str, name: &str) {
    let define = format!("#define {name}");
    let value = contents
        .lines()
        .find(|l| l.contains(&define))
        .and_then(|l| l.split('"').nth(1))
        .unwrap_or("");
    println!("cargo:rustc-env={name}={value}");
}
