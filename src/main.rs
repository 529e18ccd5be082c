#![warn(clippy::pedantic)]

mod options;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing_subscriber::EnvFilter;

use argen_core::{
    archive, generate as generate_output, resolve_script, Context, DirSink, EngineError,
    InputResolver, InputTree, Session, TerminalPrompter, ROOT_SCRIPT,
};

use options::{
    Args, BaseInput, DataParams, GenerateParams, PermutationParams, SubCommand, TreeParams,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let answers: HashMap<String, String> = args.inputs.iter().cloned().collect();
    match run(args.command, answers) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2))
        }
    }
}

fn report(e: &EngineError) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let mut red = ColorSpec::new();
    red.set_fg(Some(Color::Red)).set_bold(true);
    let _ = stderr.set_color(&red);
    let _ = write!(stderr, "error");
    let _ = stderr.reset();
    let diagnostic = e.diagnostic();
    let _ = writeln!(stderr, "[{}]: {}", diagnostic.kind, diagnostic.message);
}

fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(raw.as_ref())
        .map_err(|e| EngineError::output(format!("cannot expand {raw}: {e}")))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

fn open_session(input: &BaseInput) -> Result<(Session, std::rc::Rc<argen_script::Script>), EngineError> {
    let session = Session::new(archive::open(expand_path(&input.archetype)?)?);
    let script = session.load_script(input.script.as_deref().unwrap_or(ROOT_SCRIPT))?;
    Ok((session, script))
}

fn print_or_write(out: Option<PathBuf>, result: &str) -> Result<(), EngineError> {
    if let Some(out) = out {
        std::fs::write(out, result)?;
    } else {
        println!("{result}");
    }
    Ok(())
}

fn read_answers_file(path: &Path) -> Result<HashMap<String, String>, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    let table: toml::Table = raw
        .parse()
        .map_err(|e| EngineError::output(format!("bad answers file: {e}")))?;
    Ok(table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::output(format!("serialization failed: {e}")))
}

fn run(command: SubCommand, cli_answers: HashMap<String, String>) -> Result<(), EngineError> {
    match command {
        SubCommand::Generate(GenerateParams {
            input,
            output,
            answers,
            interactive,
        }) => {
            let (session, script) = open_session(&input)?;
            let mut merged = match &answers {
                Some(path) => read_answers_file(&expand_path(path)?)?,
                None => HashMap::new(),
            };
            merged.extend(cli_answers);

            let mut ctx = Context::new();
            if interactive {
                let mut prompter = TerminalPrompter;
                let mut resolver = InputResolver::interactive(merged, &mut prompter);
                resolve_script(&session, &script, &mut ctx, &mut resolver)?;
            } else {
                let mut resolver = InputResolver::batch(merged);
                resolve_script(&session, &script, &mut ctx, &mut resolver)?;
            }

            let mut sink = DirSink::new(expand_path(&output)?)?;
            let summary = generate_output(&session, &script, &mut ctx, &mut sink)?;
            println!(
                "generated {} ({} files copied, {} templates rendered)",
                output.display(),
                summary.files_copied,
                summary.templates_rendered
            );
            Ok(())
        }

        SubCommand::Debug(input) => {
            let (_session, script) = open_session(&input)?;
            println!("{script:#?}");
            Ok(())
        }

        SubCommand::Pretty(input) => {
            let (_session, script) = open_session(&input)?;
            let pretty = argen_core::xml::to_xml(&script);
            // canonical form must reload to the same model
            let reloaded = argen_core::load_str(&pretty, &script.path)?;
            if to_json(&*script)? != to_json(&reloaded)? {
                return Err(EngineError::output(
                    "canonical serialization did not round-trip".to_owned(),
                ));
            }
            println!("{pretty}");
            Ok(())
        }

        SubCommand::Data(DataParams {
            input,
            resolved,
            out,
        }) => {
            let (session, script) = open_session(&input)?;
            let result = if resolved {
                let mut ctx = Context::new();
                let mut resolver = InputResolver::batch(cli_answers);
                resolve_script(&session, &script, &mut ctx, &mut resolver)?;
                let values: std::collections::BTreeMap<String, argen_script::Value> = ctx
                    .flatten()
                    .into_iter()
                    .map(|(path, entry)| (path, entry.value))
                    .collect();
                to_json(&values)?
            } else {
                to_json(&*script)?
            };
            print_or_write(out.out, &result)
        }

        SubCommand::Tree(TreeParams {
            input,
            unpruned,
            out,
        }) => {
            let (session, script) = open_session(&input)?;
            let tree = InputTree::build(&session, &script)?;
            let tree = if unpruned { tree } else { tree.pruned() };
            print_or_write(out.out, &to_json(&tree)?)
        }

        SubCommand::Permutations(PermutationParams { input, limit, out }) => {
            let (session, script) = open_session(&input)?;
            let tree = InputTree::build(&session, &script)?.pruned();
            let mut lines = Vec::new();
            for (i, values) in tree.iter_permutations().enumerate() {
                if let Some(limit) = limit {
                    if i >= limit {
                        break;
                    }
                }
                lines.push(
                    serde_json::to_string(&values)
                        .map_err(|e| EngineError::output(format!("serialization failed: {e}")))?,
                );
            }
            print_or_write(out.out, &lines.join("\n"))
        }

        SubCommand::Completions { shell } => {
            let mut cli = Args::command();
            let name = cli.get_name().to_string();
            generate(shell, &mut cli, name, &mut std::io::stdout());
            Ok(())
        }
    }
}
