//! Engine integration tests

mod support;

mod test_app_deploy;
mod test_backup_rollback;
mod test_config_rollback;
mod test_object_deploy;
mod test_package_build;
mod test_policy_validate;
mod test_redeploy_idempotence;
mod test_script_match;
