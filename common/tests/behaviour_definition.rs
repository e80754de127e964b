//! Behaviour-driven tests for image definition loading.

use rootstrap_common::{ConfigError, Definition};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Default)]
struct DefinitionWorld {
    downloader: Option<String>,
    extra_source_lines: Vec<String>,
    extra_tables: Vec<String>,
    result: Option<Result<Definition, ConfigError>>,
}

impl DefinitionWorld {
    fn document(&self) -> String {
        let downloader = self.downloader.as_deref().unwrap_or("fedora-http");
        let mut doc = format!(
            "[source]\ndownloader = \"{downloader}\"\nurl = \"https://mirror.example.test\"\n"
        );
        for line in &self.extra_source_lines {
            doc.push_str(line);
            doc.push('\n');
        }
        doc.push_str("[image]\nrelease = \"39\"\narchitecture = \"x86_64\"\n");
        for table in &self.extra_tables {
            doc.push_str(table);
        }
        doc
    }

    fn definition(&self) -> &Definition {
        match self.result.as_ref().expect("definition loaded") {
            Ok(definition) => definition,
            Err(err) => panic!("expected a loaded definition, got {err}"),
        }
    }
}

#[fixture]
fn world() -> DefinitionWorld {
    DefinitionWorld::default()
}

#[given("a definition for the \"{downloader}\" downloader")]
fn given_definition(world: &mut DefinitionWorld, downloader: String) {
    world.downloader = Some(downloader);
}

#[given("the download table sets {attempts} attempts")]
fn given_attempts(world: &mut DefinitionWorld, attempts: u32) {
    world
        .extra_tables
        .push(format!("[download]\nattempts = {attempts}\n"));
}

#[given("the definition includes an unknown field")]
fn given_unknown_field(world: &mut DefinitionWorld) {
    world.extra_source_lines.push("mirror_list = true".to_owned());
}

#[given("verification is skipped in the source table")]
fn given_skip_verification(world: &mut DefinitionWorld) {
    world
        .extra_source_lines
        .push("skip_verification = true".to_owned());
}

#[when("the definition is loaded")]
fn when_loaded(world: &mut DefinitionWorld) {
    let document = world.document();
    world.result = Some(Definition::from_toml_str(&document));
}

#[then("loading succeeds")]
fn then_succeeds(world: &mut DefinitionWorld) {
    let _ = world.definition();
}

#[then("loading fails mentioning \"{snippet}\"")]
fn then_fails(world: &mut DefinitionWorld, snippet: String) {
    match world.result.as_ref().expect("definition loaded") {
        Ok(definition) => panic!("expected failure, got {definition:?}"),
        Err(err) => assert!(
            err.to_string().contains(&snippet),
            "expected '{snippet}' in: {err}"
        ),
    }
}

#[then("the retry policy allows {attempts} attempts")]
fn then_attempts(world: &mut DefinitionWorld, attempts: u32) {
    assert_eq!(world.definition().retry_policy().attempts(), attempts);
}

#[then("verification is not skipped")]
fn then_not_skipped(world: &mut DefinitionWorld) {
    assert!(!world.definition().source_config().skip_verification());
}

#[then("verification is skipped")]
fn then_skipped(world: &mut DefinitionWorld) {
    assert!(world.definition().source_config().skip_verification());
}

#[scenario(
    path = "tests/features/definition_loading.feature",
    name = "Minimal definition falls back to download defaults"
)]
fn scenario_minimal_definition(world: DefinitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/definition_loading.feature",
    name = "Download overrides reach the retry policy"
)]
fn scenario_download_overrides(world: DefinitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/definition_loading.feature",
    name = "Unknown fields are rejected"
)]
fn scenario_unknown_fields(world: DefinitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/definition_loading.feature",
    name = "Operators can opt out of verification"
)]
fn scenario_skip_verification(world: DefinitionWorld) {
    let _ = world;
}
