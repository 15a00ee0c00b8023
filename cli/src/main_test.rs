mod tests {
    use crate::scenario::{Scenario, StepSpec, parse_literal};
    use crate::*;
    use sendcache_core::{ClassRegistry, Shape, Value, builtin};

    const BOOLEAN_SCENARIO: &str = r#"
[[method]]
class = "TrueClass"
name = "foo"
returns = '"A"'

[[method]]
class = "FalseClass"
name = "foo"
returns = '"B"'

[[site]]
name = "foo"

[[step]]
op = "call"
site = "foo"
receiver = "true"
expect = '"A"'

[[step]]
op = "call"
site = "foo"
receiver = "false"
expect = '"B"'

[[step]]
op = "remove"
class = "TrueClass"
name = "foo"

[[step]]
op = "call"
site = "foo"
receiver = "true"
expect = "error: undefined method `foo' for TrueClass"
"#;

    #[test]
    fn test_cli_args_run_with_overrides() {
        let args = CliArgs::try_parse_from(["sendcache", "run", "s.toml", "--max-chain-length", "2", "--json"])
            .expect("should parse");
        match args.command {
            Commands::Run {
                file,
                max_chain_length,
                json,
                config,
            } => {
                assert_eq!(file, PathBuf::from("s.toml"));
                assert_eq!(max_chain_length, Some(2));
                assert!(json);
                assert!(config.is_none());
            }
            Commands::Check { .. } => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_args_trace_is_global() {
        let args = CliArgs::try_parse_from(["sendcache", "check", "s.toml", "--trace", "sendcache=debug"])
            .expect("should parse");
        assert_eq!(args.trace.as_deref(), Some("sendcache=debug"));
        assert!(matches!(args.command, Commands::Check { .. }));
    }

    #[test]
    fn test_cli_args_requires_subcommand() {
        assert!(CliArgs::try_parse_from(["sendcache"]).is_err());
    }

    #[test]
    fn test_parse_literal_forms() {
        let registry = ClassRegistry::new();
        let dog = registry.define_class("Dog", None).expect("define Dog");
        assert_eq!(parse_literal(&registry, "nil").unwrap(), Value::Nil);
        assert_eq!(parse_literal(&registry, " true ").unwrap(), Value::Bool(true));
        assert_eq!(parse_literal(&registry, "-3").unwrap(), Value::Int(-3));
        assert_eq!(parse_literal(&registry, "2.5").unwrap(), Value::Float(2.5));
        assert_eq!(parse_literal(&registry, ":sym").unwrap(), Value::symbol("sym"));
        assert_eq!(parse_literal(&registry, "\"hi there\"").unwrap(), Value::str("hi there"));
        assert_eq!(parse_literal(&registry, "new Dog").unwrap().shape(), Shape::Class(dog));
        assert_eq!(parse_literal(&registry, "new Object").unwrap().shape(), Shape::Class(builtin::OBJECT));
        assert!(parse_literal(&registry, "new Cat").is_err());
        assert!(parse_literal(&registry, "bogus").is_err());
        assert!(parse_literal(&registry, ":").is_err());
    }

    #[test]
    fn test_scenario_parses_tagged_steps() {
        let scenario = Scenario::from_toml_str(BOOLEAN_SCENARIO).expect("should parse");
        assert_eq!(scenario.methods.len(), 2);
        assert_eq!(scenario.steps.len(), 4);
        assert!(matches!(&scenario.steps[2], StepSpec::Remove { class, name } if class == "TrueClass" && name == "foo"));
    }

    #[test]
    fn test_scenario_run_matches_expectations() {
        let scenario = Scenario::from_toml_str(BOOLEAN_SCENARIO).expect("should parse");
        let report = scenario.run(&DispatchConfig::default()).expect("should run");
        assert_eq!(report.mismatches(), 0, "{:?}", report.steps);
        assert_eq!(report.sites.len(), 1);
        let site = &report.sites[0];
        assert_eq!(site.installed, 1);
        assert_eq!(site.nodes.len(), 1);
        assert_eq!(site.nodes[0].kind, "boolean");
        assert_eq!(site.stats.repairs, 1);
        assert_eq!(site.stats.merges, 1);
    }

    #[test]
    fn test_scenario_rejects_unknown_references() {
        let scenario = Scenario::from_toml_str(
            r#"
[[site]]
name = "x"

[[step]]
op = "call"
site = "y"
receiver = "1"
"#,
        )
        .expect("should parse");
        let err = scenario.check().expect_err("unknown site");
        assert!(format!("{err:#}").contains("unknown site y"));
    }

    #[test]
    fn test_scenario_method_needs_exactly_one_body() {
        let scenario = Scenario::from_toml_str(
            r#"
[[method]]
class = "Integer"
name = "x"
"#,
        )
        .expect("should parse");
        let err = scenario.check().expect_err("no body");
        assert!(format!("{err:#}").contains("one of `returns` or `fails`"));
    }

    #[test]
    fn test_resolve_config_precedence() {
        let scenario = Scenario::from_toml_str("[config]\nmaxChainLength = 3\nallowCloning = false\n").expect("should parse");
        let config = resolve_config(&scenario, None, None).expect("config");
        assert_eq!(config.max_chain_length, 3);
        assert!(!config.allow_cloning);

        let config = resolve_config(&scenario, None, Some(5)).expect("config");
        assert_eq!(config.max_chain_length, 5);
        assert!(!config.allow_cloning);
    }

    #[test]
    fn test_render_text_shows_chain() {
        let scenario = Scenario::from_toml_str(BOOLEAN_SCENARIO).expect("should parse");
        let report = scenario.run(&DispatchConfig::default()).expect("should run");
        let mut out = Vec::new();
        render_text(&report, &mut out).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("[1] foo: foo(true) -> \"A\""));
        assert!(text.contains("site foo [monomorphic] installed 1/8"));
        assert!(text.contains("true -> (open)"));
        assert!(text.contains("false -> FalseClass#foo entered 0"));
    }
}
