//! Interactive operator prompts
//!
//! dialoguer blocks on the terminal, so every prompt runs on the blocking
//! thread pool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, MultiSelect, Password, Select};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use blegw_core::{AdvRecord, Credentials, ScanMode};
use blegw_gateway::selection::device_label;
use blegw_gateway::{DeviceSelector, SelectionAction};

/// Data file offered when the operator has not used one before
pub const DEFAULT_DATA_FILE: &str = "d600_data.csv";

const FALLBACK_ITEMS: [&str; 3] = ["Rescan", "Continue without BLE connections", "Exit"];

async fn blocking<T, F>(prompt: F) -> Result<T>
where
    F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(prompt)
        .await
        .context("Prompt task failed")?
        .context("Prompt failed")
}

/// Dotted local part or quoted string, then a bracketed IPv4 address or a
/// domain whose top level has at least two letters
static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#,
    )
    .ok()
});

/// Whether a user name looks like an e-mail address
pub fn is_valid_email(input: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(input))
}

pub async fn credentials(default_user: Option<String>) -> Result<Credentials> {
    blocking(move || {
        let theme = ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(&theme).with_prompt("User (e-mail)");
        if let Some(user) = default_user {
            input = input.default(user);
        }
        let user = input
            .validate_with(|input: &String| -> Result<(), &str> {
                if is_valid_email(input) {
                    Ok(())
                } else {
                    Err("Not a valid e-mail address")
                }
            })
            .interact_text()?;
        let password = Password::with_theme(&theme)
            .with_prompt("Password")
            .interact()?;
        Ok(Credentials::new(user, password))
    })
    .await
}

/// Pick one gateway; `None` when the operator chooses Exit
pub async fn gateway(gateways: Vec<String>) -> Result<Option<String>> {
    blocking(move || {
        let mut items = gateways.clone();
        items.push("Exit".to_string());
        let index = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select gateway")
            .items(&items)
            .default(0)
            .interact()?;
        Ok(gateways.get(index).cloned())
    })
    .await
}

/// Active (with scan responses) or passive scanning
pub async fn scan_active(default: bool) -> Result<bool> {
    blocking(move || {
        let index = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Scan type")
            .items(&["Active", "Passive"])
            .default(if default { 0 } else { 1 })
            .interact()?;
        Ok(index == 0)
    })
    .await
}

pub async fn scan_period(default: u32) -> Result<u32> {
    blocking(move || {
        Input::<u32>::with_theme(&ColorfulTheme::default())
            .with_prompt("Scan period (seconds)")
            .default(default)
            .validate_with(|period: &u32| -> Result<(), &str> {
                if *period > 0 {
                    Ok(())
                } else {
                    Err("Scan period must be at least one second")
                }
            })
            .interact_text()
    })
    .await
}

pub async fn confirm(prompt: &'static str, default: bool) -> Result<bool> {
    blocking(move || {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .interact()
    })
    .await
}

pub async fn scan_mode(default: ScanMode) -> Result<ScanMode> {
    blocking(move || {
        let index = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("D600 scanner mode")
            .items(&["Single scan", "Continuous scan"])
            .default(match default {
                ScanMode::Single => 0,
                ScanMode::Continuous => 1,
            })
            .interact()?;
        Ok(if index == 0 {
            ScanMode::Single
        } else {
            ScanMode::Continuous
        })
    })
    .await
}

/// Ask whether to save reads and where; `None` to skip the data file
pub async fn data_file(default: Option<String>) -> Result<Option<PathBuf>> {
    if !confirm("Save data to file?", default.is_some()).await? {
        return Ok(None);
    }
    let default = default.unwrap_or_else(|| DEFAULT_DATA_FILE.to_string());
    let name = blocking(move || {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt("File name")
            .default(default)
            .interact_text()
    })
    .await?;
    Ok(Some(PathBuf::from(name)))
}

fn fallback_action(index: usize) -> SelectionAction {
    match index {
        0 => SelectionAction::Rescan,
        1 => SelectionAction::ContinueWithoutConnections,
        _ => SelectionAction::Exit,
    }
}

fn ask_devices(gateway_id: &str, candidates: &[AdvRecord]) -> dialoguer::Result<SelectionAction> {
    let theme = ColorfulTheme::default();
    if !candidates.is_empty() {
        let labels: Vec<String> = candidates
            .iter()
            .enumerate()
            .map(|(i, record)| device_label(i, record))
            .collect();
        let picked = MultiSelect::with_theme(&theme)
            .with_prompt(format!("[{gateway_id}] Select devices (space to toggle)"))
            .items(&labels)
            .interact()?;
        if !picked.is_empty() {
            return Ok(SelectionAction::Connect(
                picked.into_iter().map(|i| candidates[i].clone()).collect(),
            ));
        }
    }

    let index = Select::with_theme(&theme)
        .with_prompt(format!("[{gateway_id}] No devices selected"))
        .items(&FALLBACK_ITEMS)
        .default(0)
        .interact()?;
    Ok(fallback_action(index))
}

/// Terminal device menu. One menu is shown at a time across gateways.
#[derive(Default)]
pub struct DialoguerSelector {
    menu: tokio::sync::Mutex<()>,
}

#[async_trait]
impl DeviceSelector for DialoguerSelector {
    async fn select_devices(&self, gateway_id: &str, candidates: &[AdvRecord]) -> SelectionAction {
        let _menu = self.menu.lock().await;
        let gateway = gateway_id.to_string();
        let candidates = candidates.to_vec();
        match blocking(move || ask_devices(&gateway, &candidates)).await {
            Ok(action) => action,
            Err(e) => {
                warn!(gateway = %gateway_id, error = %e, "Device selection failed, exiting");
                SelectionAction::Exit
            }
        }
    }
}
