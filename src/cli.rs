use std::path::PathBuf;

use clap::Parser;

use crate::merge::{BuildEnvironment, DuplicateMode, MergeConfig, ResourceSpec};

#[derive(Parser, Debug)]
#[command(name = "singlejar")]
#[command(version)]
#[command(about = "Merge jar/zip archives into a single deployable archive", long_about = None)]
#[command(after_help = "Examples:\n  \
  singlejar --output app.jar --sources a.jar b.jar --main_class com.example.Main\n  \
  singlejar --output app.jar --normalize --resources conf/app.properties:/tmp/app.properties\n  \
  singlejar --output app.jar --java_launcher stub --sources lib.jar")]
pub struct Cli {
    /// Output archive
    #[arg(long, value_name = "FILE")]
    pub output: PathBuf,

    /// Source archives, merged in the given order
    #[arg(long, value_name = "JAR", num_args = 1..)]
    pub sources: Vec<PathBuf>,

    /// Files to add, as TARGET:FILE or FILE (stored under its own path)
    #[arg(long, value_name = "SPEC", num_args = 1.., value_parser = ResourceSpec::parse)]
    pub resources: Vec<ResourceSpec>,

    /// Files to add under their base name, each at most once
    #[arg(long = "classpath_resources", value_name = "FILE", num_args = 1..)]
    pub classpath_resources: Vec<PathBuf>,

    /// Executable stub prepended to the archive
    #[arg(long = "java_launcher", value_name = "FILE")]
    pub java_launcher: Option<PathBuf>,

    /// Main-Class attribute of the manifest
    #[arg(long = "main_class", value_name = "CLASS")]
    pub main_class: Option<String>,

    /// Extra manifest lines, e.g. "Premain-Class: com.example.Agent"
    #[arg(long = "deploy_manifest_lines", value_name = "LINE", num_args = 1..)]
    pub deploy_manifest_lines: Vec<String>,

    /// Files of key=value lines added to build-data.properties
    #[arg(long = "build_info_file", value_name = "FILE")]
    pub build_info_file: Vec<PathBuf>,

    /// key=value pair added to build-data.properties
    #[arg(long = "extra_build_info", value_name = "KEY=VALUE")]
    pub extra_build_info: Vec<String>,

    /// Keep only entries whose path starts with one of these prefixes
    #[arg(long = "include_prefixes", value_name = "PREFIX", num_args = 1..)]
    pub include_prefixes: Vec<String>,

    /// Use fixed 1980 timestamps for reproducible output
    #[arg(long)]
    pub normalize: bool,

    /// Warn on conflicting duplicate resources instead of failing
    #[arg(long = "warn_duplicate_resources")]
    pub warn_duplicate_resources: bool,

    /// Do not write build-data.properties
    #[arg(long = "exclude_build_data")]
    pub exclude_build_data: bool,

    /// Value of build.target in build-data.properties
    #[arg(long = "build_target", value_name = "LABEL", default_value = "")]
    pub build_target: String,

    /// Log every entry decision
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn duplicate_mode(&self) -> DuplicateMode {
        if self.warn_duplicate_resources {
            DuplicateMode::Warn
        } else {
            DuplicateMode::Reject
        }
    }

    /// The merge run described by these options, with the build user and
    /// host taken from the environment.
    pub fn into_config(self) -> MergeConfig {
        let duplicate_mode = self.duplicate_mode();
        MergeConfig {
            sources: self.sources,
            resources: self.resources,
            classpath_resources: self.classpath_resources,
            launcher: self.java_launcher,
            main_class: self.main_class,
            manifest_lines: self.deploy_manifest_lines,
            build_info_files: self.build_info_file,
            build_info_lines: self.extra_build_info,
            include_prefixes: self.include_prefixes,
            normalize: self.normalize,
            duplicate_mode,
            exclude_build_data: self.exclude_build_data,
            build_target: self.build_target,
            environment: BuildEnvironment::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("singlejar").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn multi_value_options() {
        let cli = parse(&[
            "--output",
            "out.jar",
            "--sources",
            "a.jar",
            "b.jar",
            "--resources",
            "res1:/tmp/res11",
            "/tmp/res2",
            "--deploy_manifest_lines",
            "property1: foo",
            "property2: bar",
        ]);
        assert_eq!(cli.sources, [PathBuf::from("a.jar"), PathBuf::from("b.jar")]);
        assert_eq!(cli.resources[0], ResourceSpec::new("res1", "/tmp/res11").unwrap());
        assert_eq!(cli.resources[1].target(), "tmp/res2");
        assert_eq!(cli.deploy_manifest_lines, ["property1: foo", "property2: bar"]);
    }

    #[test]
    fn repeated_build_info_keeps_order() {
        let cli = parse(&[
            "--output",
            "out.jar",
            "--build_info_file",
            "b1",
            "--extra_build_info",
            "property=value",
            "--build_info_file",
            "b2",
            "--warn_duplicate_resources",
            "--normalize",
        ]);
        let config = cli.into_config();
        assert_eq!(config.build_info_files, [PathBuf::from("b1"), PathBuf::from("b2")]);
        assert_eq!(config.build_info_lines, ["property=value"]);
        assert_eq!(config.duplicate_mode, DuplicateMode::Warn);
        assert!(config.normalize);
    }

    #[test]
    fn output_is_required() {
        assert!(Cli::try_parse_from(["singlejar", "--sources", "a.jar"]).is_err());
    }

    #[test]
    fn bad_resource_spec_is_rejected() {
        assert!(Cli::try_parse_from(["singlejar", "--output", "o.jar", "--resources", "dir/:x"]).is_err());
    }
}
