use super::*;

/// # Safety
/// Callers hold `ENV_LOCK` so no other test touches the environment.
unsafe fn clear_enhance_env() {
    unsafe {
        std::env::remove_var("ENHANCE_API_KEY_ENV");
        std::env::remove_var("ENHANCE_MODEL");
        std::env::remove_var("ENHANCE_BASE_URL");
        std::env::remove_var("ENHANCE_TEMPERATURE");
        std::env::remove_var("ENHANCE_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("ENHANCE_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("API_KEY");
        std::env::remove_var("GEMINI_TEST_KEY");
    }
}

#[test]
fn from_env_defaults_to_gemini() {
    let _guard = crate::ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_enhance_env();
        std::env::set_var("API_KEY", "secret");
    }

    let cfg = EnhanceConfig::from_env().unwrap();
    assert_eq!(cfg.api_key, "secret");
    assert_eq!(cfg.model, DEFAULT_GEMINI_MODEL);
    assert_eq!(cfg.base_url, DEFAULT_GEMINI_BASE_URL);
    assert!((cfg.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(
        cfg.timeouts,
        EnhanceTimeouts {
            request_secs: DEFAULT_ENHANCE_REQUEST_TIMEOUT_SECS,
            connect_secs: DEFAULT_ENHANCE_CONNECT_TIMEOUT_SECS
        }
    );

    unsafe { clear_enhance_env() };
}

#[test]
fn from_env_follows_key_indirection_and_overrides() {
    let _guard = crate::ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_enhance_env();
        std::env::set_var("ENHANCE_API_KEY_ENV", "GEMINI_TEST_KEY");
        std::env::set_var("GEMINI_TEST_KEY", "g-key");
        std::env::set_var("ENHANCE_MODEL", "gemini-2.5-pro");
        std::env::set_var("ENHANCE_BASE_URL", "https://example.test/v1/");
        std::env::set_var("ENHANCE_REQUEST_TIMEOUT_SECS", "5");
    }

    let cfg = EnhanceConfig::from_env().unwrap();
    assert_eq!(cfg.api_key, "g-key");
    assert_eq!(cfg.model, "gemini-2.5-pro");
    assert_eq!(cfg.base_url, "https://example.test/v1");
    assert_eq!(cfg.timeouts.request_secs, 5);

    unsafe { clear_enhance_env() };
}

#[test]
fn from_env_missing_key_names_the_variable() {
    let _guard = crate::ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_enhance_env();
        std::env::set_var("ENHANCE_API_KEY_ENV", "GEMINI_TEST_KEY");
    }

    let err = EnhanceConfig::from_env().unwrap_err();
    assert!(matches!(err, EnhanceError::MissingApiKey { ref var } if var == "GEMINI_TEST_KEY"));

    unsafe { clear_enhance_env() };
}
