//! Command handlers: bridge CLI args -> core orchestration -> output formatting.

pub mod config_cmd;
pub mod connect;
pub mod scan;

use climalink_core::BleStack;

use crate::error::CliError;

/// Open the Bluetooth backend compiled into this binary.
#[cfg(feature = "btleplug")]
pub async fn open_stack() -> Result<BleStack, CliError> {
    use climalink_core::backend::BtleplugStack;

    let stack = BtleplugStack::new()
        .await
        .map_err(|e| CliError::Discovery {
            message: e.message().to_owned(),
        })?;
    Ok(stack.into_stack())
}

/// Open the Bluetooth backend compiled into this binary.
#[cfg(not(feature = "btleplug"))]
#[allow(clippy::unused_async)]
pub async fn open_stack() -> Result<BleStack, CliError> {
    Err(CliError::NoBackend)
}
