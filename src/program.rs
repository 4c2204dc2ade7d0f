//! Program compilation
//!
//! Expands includes, hands the source to the driver's build step and, on
//! failure, gathers the build log of every device in the selection.

use crate::driver::Driver;
use crate::error::{ComputeError, Result};
use crate::include::IncludeLibrary;
use crate::runtime::DeviceContext;
use log::{info, trace, warn};

/// Builds `source` for every device of `context`
///
/// A failed build releases the program and reports
/// [`ComputeError::Build`] with the logs of all devices joined by newlines.
pub fn compile<D: Driver>(
    driver: &D,
    context: &DeviceContext<D>,
    includes: &IncludeLibrary,
    source: &str,
    options: &str,
) -> Result<D::Program> {
    let expanded = includes.expand(source);
    trace!("Expanded kernel source:\n{}", expanded);

    let program = driver
        .create_program(context.context(), &expanded)
        .map_err(|source| ComputeError::ResourceCreation {
            what: "program",
            source,
        })?;

    let devices = context.device().devices();
    match driver.build_program(&program, devices, options) {
        Ok(()) => {
            info!(
                "Built program for '{}' ({} device(s), options '{}')",
                context.platform_name(),
                devices.len(),
                options
            );
            Ok(program)
        }
        Err(e) => {
            let log = devices
                .iter()
                .map(|device| {
                    driver
                        .build_log(&program, device)
                        .unwrap_or_else(|le| format!("<build log unavailable: {}>", le))
                })
                .collect::<Vec<_>>()
                .join("\n");
            warn!("Program build failed on '{}': {}", context.platform_name(), e);
            driver.release_program(program);
            Err(ComputeError::Build { code: e.code, log })
        }
    }
}
