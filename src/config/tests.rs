use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr, "127.0.0.1:3000".parse().expect("addr"));
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(settings.cache.enabled);
    assert!(settings.cache.redis.is_none());
    assert_eq!(settings.cache.max_body_bytes, 1024 * 1024);
    assert_eq!(settings.cache.max_entries.get(), 10_000);
    assert_eq!(settings.cache.sweep_interval, Duration::from_secs(60));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_port_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);

    let err = Settings::from_raw(raw).expect_err("port zero is invalid");
    assert!(matches!(err, LoadError::Invalid { key: "server.port", .. }));
}

#[test]
fn distributed_cache_requires_redis_url() {
    let mut raw = RawSettings::default();
    raw.cache.distributed = Some(true);

    let err = Settings::from_raw(raw).expect_err("redis url required");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.redis_url",
            ..
        }
    ));
}

#[test]
fn distributed_cache_validates_scheme() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_distributed: Some(true),
        cache_redis_url: Some("http://cache.internal:6379".to_string()),
        ..Default::default()
    };
    raw.apply_serve_overrides(&overrides);

    let err = Settings::from_raw(raw).expect_err("scheme must be redis");
    assert!(err.to_string().contains("unsupported scheme `http`"));
}

#[test]
fn distributed_cache_resolves_redis_settings() {
    let mut raw = RawSettings::default();
    raw.cache.distributed = Some(true);
    raw.cache.redis_url = Some(" redis://cache.internal:6379/2 ".to_string());
    raw.cache.redis_key_prefix = Some("staging:".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    let redis = settings.cache.redis.expect("redis settings");
    assert_eq!(redis.url, "redis://cache.internal:6379/2");
    assert_eq!(redis.key_prefix, "staging:");
    assert_eq!(redis.timeout, Duration::from_millis(250));
}

#[test]
fn policy_overrides_apply_per_resource() {
    let mut raw = RawSettings::default();
    raw.cache.policies.insert(
        "Roles".to_string(),
        RawPolicySettings {
            duration_seconds: Some(90),
            vary_by_query: Some(vec!["page".to_string()]),
        },
    );

    let settings = Settings::from_raw(raw).expect("valid settings");
    let roles = settings
        .cache
        .policies
        .get(ResourceType::Roles)
        .expect("roles policy");
    assert_eq!(roles.duration_seconds(), 90);
    assert_eq!(roles.vary_by_query().len(), 1);

    let people = settings
        .cache
        .policies
        .get(ResourceType::People)
        .expect("people policy");
    assert_eq!(people.duration_seconds(), 300);
}

#[test]
fn unknown_policy_resource_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache
        .policies
        .insert("doors".to_string(), RawPolicySettings::default());

    let err = Settings::from_raw(raw).expect_err("unknown resource");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.policies",
            ..
        }
    ));
}

#[test]
fn zero_policy_duration_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.policies.insert(
        "walls".to_string(),
        RawPolicySettings {
            duration_seconds: Some(0),
            vary_by_query: None,
        },
    );

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["wallwise"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_arguments() {
    let args = CliArgs::parse_from([
        "wallwise",
        "serve",
        "--server-port",
        "8080",
        "--cache-distributed",
        "true",
        "--cache-redis-url",
        "redis://localhost:6379",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(8080));
            assert_eq!(serve.overrides.cache_distributed, Some(true));
            assert_eq!(
                serve.overrides.cache_redis_url.as_deref(),
                Some("redis://localhost:6379")
            );
        }
    }
}
