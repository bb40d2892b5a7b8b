/// Environment-variable knobs for the duplication session.
///
/// Every toggle goes through these helpers so truthy parsing lives in one
/// place and each variable is read at most once per process.

pub(crate) const DISABLE_INCREMENTAL_COPY_VAR: &str = "SNOW_DUPLICATION_DISABLE_INCREMENTAL_COPY";
pub(crate) const DISABLE_CURSOR_VAR: &str = "SNOW_DUPLICATION_DISABLE_CURSOR";

/// Returns `true` when `raw` is `1`, `true`, `yes` or `on`
/// (case-insensitive, trimmed).
#[inline]
pub(crate) fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| is_truthy(&raw))
        .unwrap_or(false)
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_unless(fn_name, "ENV_VAR")` returns `true` unless the env var
/// is truthy.
macro_rules! define_env_flag {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        pub(crate) fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
}

define_env_flag!(enabled_unless(
    incremental_copy_allowed,
    DISABLE_INCREMENTAL_COPY_VAR
));
define_env_flag!(enabled_unless(cursor_overlay_allowed, DISABLE_CURSOR_VAR));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_insensitive_and_trimmed() {
        for raw in ["1", "true", " TRUE ", "Yes", "on"] {
            assert!(is_truthy(raw), "{raw:?} should be truthy");
        }
        for raw in ["", "0", "false", "off", "enabled"] {
            assert!(!is_truthy(raw), "{raw:?} should not be truthy");
        }
    }

    #[test]
    fn unset_variable_is_not_truthy() {
        assert!(!env_var_truthy("SNOW_DUPLICATION_TEST_VARIABLE_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn variable_value_goes_through_truthy_parsing() {
        const VAR: &str = "SNOW_DUPLICATION_TEST_TRUTHY_VALUE";
        for (raw, expected) in [(" On ", true), ("1", true), ("0", false), ("nope", false)] {
            // SAFETY: no other test reads or writes this variable.
            unsafe { std::env::set_var(VAR, raw) };
            assert_eq!(env_var_truthy(VAR), expected, "{raw:?}");
        }
        unsafe { std::env::remove_var(VAR) };
        assert!(!env_var_truthy(VAR));
    }

    define_env_flag!(enabled_unless(
        test_feature_allowed,
        "SNOW_DUPLICATION_TEST_DISABLE_FEATURE"
    ));

    #[test]
    fn disable_variable_turns_flag_off_and_is_cached() {
        const VAR: &str = "SNOW_DUPLICATION_TEST_DISABLE_FEATURE";
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var(VAR, "true") };
        assert!(!test_feature_allowed());
        unsafe { std::env::remove_var(VAR) };
        assert!(!test_feature_allowed());
    }
}
