use std::sync::Arc;

use decision_core::{
    DecideOptions, DecisionServiceConfig, InMemoryUserProfileService, ProjectConfig, UserContext,
};

pub fn main() -> decision_core::Result<()> {
    // Configure env_logger to see decision logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("decision_core"))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/data/datafile.json".to_owned());
    let datafile = std::fs::read_to_string(path)?;
    let config = ProjectConfig::from_json(&datafile)?;

    let service = DecisionServiceConfig::new()
        .user_profile_service(Arc::new(InMemoryUserProfileService::new()))
        .to_decision_service();

    let mut user = UserContext::new("test-user", Default::default());
    user.set_attribute("house", "Gryffindor");
    user.set_attribute("age", 25);

    let options = DecideOptions {
        include_reasons: true,
        ..Default::default()
    };

    for flag_key in ["feature_1", "feature_holdout"] {
        let Some(flag) = config.get_flag(flag_key) else {
            println!("{flag_key}: unknown flag");
            continue;
        };
        let response = service.get_decision_for_flag(&config, flag, &user, &options, false);
        match &response.result {
            Ok(Some(decision)) => println!(
                "{flag_key}: variation {} from {} (enabled: {})",
                decision.variation.key, decision.source, decision.variation.feature_enabled
            ),
            Ok(None) => println!("{flag_key}: no decision"),
            Err(err) => println!("{flag_key}: decision failed: {err}"),
        }
        for reason in response.reasons.to_report() {
            println!("  {reason}");
        }
    }

    Ok(())
}
