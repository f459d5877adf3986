//! Capability validation for nodes running in a user namespace.

use nodeboot_common::constants::{MIN_NOFILE_HARD_LIMIT, REQUIRED_CONTROLLERS};
use nodeboot_common::error::{NodebootError, Result};
use nodeboot_common::types::{CgroupMode, EnvironmentFacts};

/// Checks the resource limits and cgroup delegation a rootless node needs.
///
/// A low file-descriptor limit is only warned about. Missing delegated
/// controllers are fatal since kubelet cannot run without them.
///
/// # Errors
///
/// Returns [`NodebootError::Validation`] if a required controller is not
/// delegated.
pub fn validate(facts: &EnvironmentFacts) -> Result<()> {
    if !facts.userns {
        return Ok(());
    }

    if let Some(hard) = facts
        .nofile_hard_limit
        .filter(|hard| *hard < MIN_NOFILE_HARD_LIMIT)
    {
        tracing::warn!(
            expected = MIN_NOFILE_HARD_LIMIT,
            actual = hard,
            "UserNS: RLIMIT_NOFILE hard limit is below the expected minimum"
        );
    }

    if facts.cgroup == CgroupMode::V2 {
        for required in REQUIRED_CONTROLLERS {
            if !facts.delegated_controllers.iter().any(|c| c == required) {
                tracing::error!(controller = required, "UserNS: controller is not delegated");
                return Err(NodebootError::Validation {
                    message: format!("UserNS: {required} controller needs to be delegated"),
                });
            }
        }
    }
    Ok(())
}
