//! Subcommand handlers
//!
//! Every handler returns the process exit code. Errors bubble up as
//! `anyhow::Error` and `main` turns them into a message and exit 1.

use crate::batch::{split_batch, BatchOrchestrator, SelfSpawner};
use crate::config::Config;
use crate::display;
use crate::recorder::Recorder;
use crate::runner::{inherit_session, run_teed, script_command, shell_command, RunOutput};
use crate::steps::build_from_steps;
use anyhow::{bail, Context};
use clap::ArgMatches;
use cmdflow_log::{
    EventEnd, EventIndex, EventStart, EventStep, FamilyFilter, LogId, LogStore, Payload, Query,
    SessionInfo, SingleRun,
};
use cmdflow_script::{AssembledScript, Assembler, Catalogs, ScriptType};
use std::any::Any;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn required<'a, T>(args: &'a ArgMatches, id: &str) -> anyhow::Result<&'a T>
where
    T: Any + Clone + Send + Sync + 'static,
{
    args.get_one::<T>(id)
        .with_context(|| format!("missing argument <{id}>"))
}

fn script_type_flag(args: &ArgMatches) -> anyhow::Result<Option<ScriptType>> {
    Ok(args
        .get_one::<String>("type")
        .map(|raw| raw.parse::<ScriptType>())
        .transpose()?)
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// A step to record under a script event
struct PlannedStep {
    name: String,
    code: Option<String>,
}

/// One invocation: resolved configuration plus the recorder
#[derive(Debug, Clone)]
pub struct App {
    config: Config,
    recorder: Recorder,
}

impl App {
    /// App writing records stamped with `session`
    #[must_use]
    pub fn new(config: Config, session: SessionInfo) -> Self {
        let recorder = Recorder::new(LogStore::open(config.logs_dir()), session);
        Self { config, recorder }
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Recorder for this invocation
    #[inline]
    #[must_use]
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    fn store(&self) -> &LogStore {
        self.recorder.store()
    }

    fn catalogs(&self) -> anyhow::Result<Catalogs> {
        Catalogs::load_dir(&self.config.data_dir).context("loading catalogs")
    }

    fn index(&self) -> anyhow::Result<EventIndex> {
        self.store().index().context("reading the log store")
    }

    /// History for log replay; an unreadable store only disables replay
    fn history(&self) -> Option<EventIndex> {
        match self.store().index() {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(error = %e, "log store unreadable, log references will not resolve");
                None
            }
        }
    }

    /// Append through the store, failing loudly
    fn append(&self, payload: Payload) -> anyhow::Result<LogId> {
        let kind = payload.kind();
        let record = self
            .store()
            .append(self.recorder.session().clone(), payload)
            .with_context(|| format!("recording {kind}"))?;
        Ok(record.id)
    }

    /// Run the parsed command line
    pub async fn dispatch(&self, matches: &ArgMatches) -> anyhow::Result<i32> {
        match matches.subcommand() {
            Some(("run", args)) => self.run(args).await,
            Some(("exec", args)) => self.exec(args).await,
            Some(("logs", args)) => self.logs(args),
            Some(("events", args)) => match args.subcommand() {
                Some(("list", sub)) => self.events_list(sub),
                Some(("show", sub)) => self.events_show(sub),
                Some(("rerun", sub)) => self.events_rerun(sub).await,
                _ => bail!("expected one of: list, show, rerun"),
            },
            Some(("step", args)) => match args.subcommand() {
                Some(("show", sub)) => self.step_show(sub),
                _ => bail!("expected: show"),
            },
            Some(("workflow", args)) => match args.subcommand() {
                Some(("list", _)) => self.workflow_list(),
                Some(("show", sub)) => self.workflow_show(sub),
                Some(("build", sub)) => self.workflow_build(sub),
                Some(("run", sub)) => self.workflow_run(sub).await,
                _ => bail!("expected one of: list, show, build, run"),
            },
            Some(("build-from-steps", args)) => self.build_from_steps(args),
            Some(("event", args)) => match args.subcommand() {
                Some(("start", sub)) => self.event_start(sub),
                Some(("step", sub)) => self.event_step(sub),
                Some(("end", sub)) => self.event_end(sub),
                _ => bail!("expected one of: start, step, end"),
            },
            Some((other, _)) => bail!("unknown command '{other}'"),
            None => bail!("no command given"),
        }
    }

    async fn run(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let mut tokens = vec![required::<String>(args, "name")?.clone()];
        if let Some(rest) = args.get_many::<String>("args") {
            tokens.extend(rest.cloned());
        }

        let parts = split_batch(&tokens, &self.config.settings.batch_separator);
        if parts.len() > 1 {
            let prefix = vec![
                "--data-dir".to_string(),
                self.config.data_dir.display().to_string(),
                "run".to_string(),
            ];
            let spawner = SelfSpawner::current(prefix, self.recorder.session().pid)
                .context("locating the cmdflow executable")?;
            let report = BatchOrchestrator::new(&self.recorder, Arc::new(spawner))
                .run(&parts, &tokens.join(" "))
                .await;
            eprintln!(
                "batch: {} commands, {} succeeded, {} failed ({}ms)",
                report.total(),
                report.successful(),
                report.failed(),
                report.duration_ms
            );
            return Ok(report.exit_code());
        }

        let Some(part) = parts.first() else {
            bail!("nothing to run");
        };
        let Some((name, rest)) = part.split_first() else {
            bail!("nothing to run");
        };
        let catalogs = self.catalogs()?;
        let Some(registered) = catalogs.commands.get(name) else {
            bail!("unknown command '{name}'");
        };
        let script_type = self.config.settings.default_script_type;
        let mut line = registered.command.clone();
        for arg in rest {
            line.push(' ');
            line.push_str(&script_type.quote(arg));
        }
        self.execute_line(name, &line).await
    }

    async fn exec(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let tokens: Vec<&String> = args
            .get_many::<String>("command")
            .context("missing command")?
            .collect();
        let name = tokens.first().map_or("exec", |t| t.as_str()).to_string();
        let line = tokens
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.execute_line(&name, &line).await
    }

    /// Run one shell line and record it as a `single`
    async fn execute_line(&self, name: &str, line: &str) -> anyhow::Result<i32> {
        let settings = &self.config.settings;
        let mut command = shell_command(settings.default_script_type, settings.shell.as_deref(), line);
        inherit_session(&mut command, self.recorder.session());
        tracing::info!(name, command = line, "running command");
        let output = run_teed(command)
            .await
            .with_context(|| format!("running '{line}'"))?;
        let RunOutput {
            exit_code,
            duration_ms,
            stdout,
            stderr,
        } = output;
        self.recorder.record(Payload::Single(SingleRun {
            name: name.to_string(),
            command: line.to_string(),
            exit_code,
            duration_ms,
            stdout,
            stderr,
        }));
        Ok(exit_code)
    }

    fn logs(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        if args.subcommand_name() == Some("clear") {
            self.store().clear().context("clearing the log store")?;
            println!("log cleared");
            return Ok(0);
        }

        let session = args.get_one::<u32>("session").copied();
        let last = args.get_one::<usize>("last").copied().unwrap_or(0);
        let mut records = match args.get_one::<String>("search") {
            Some(pattern) if args.get_flag("regex") => {
                self.store().search(&Query::regex(pattern)?)?
            }
            Some(needle) => self.store().search(&Query::text(needle.as_str()))?,
            None => match session {
                Some(pid) => self.store().search_session(pid)?,
                None => self.store().read_last(last)?,
            },
        };
        if let Some(pid) = session {
            records.retain(|record| record.session.pid == pid);
        }
        // 0 keeps everything
        if last > 0 && records.len() > last {
            records.drain(..records.len() - last);
        }

        if args.get_flag("json") {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else if records.is_empty() {
            println!("no log records");
        } else {
            for record in &records {
                println!("{}", display::summary_line(record));
            }
        }
        Ok(0)
    }

    fn events_list(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let filter = if args.get_flag("batches") {
            FamilyFilter::Batches
        } else if args.get_flag("scripts") {
            FamilyFilter::Events
        } else {
            FamilyFilter::All
        };
        let index = self.index()?;
        let starts = index.list_events(filter, args.get_one::<usize>("last").copied());
        if starts.is_empty() {
            println!("no events recorded");
        }
        for start in starts {
            println!("{}", display::summary_line(start));
        }
        Ok(0)
    }

    fn events_show(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let id = LogId(*required::<u64>(args, "id")?);
        let index = self.index()?;
        let family = index.family(id)?;
        print!("{}", display::family(&family));
        Ok(0)
    }

    async fn events_rerun(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let id = LogId(*required::<u64>(args, "id")?);
        let index = self.index()?;
        let family = index.family(id)?;
        let Some(start) = family.start.as_event_start() else {
            bail!("log #{id} is a batch; only script events can be rerun");
        };
        let Some(script) = start.script.clone() else {
            bail!("event #{id} has no stored script");
        };
        let script_type = start.script_type.parse().unwrap_or_else(|_| {
            tracing::warn!(recorded = %start.script_type, "unknown script type, using default");
            self.config.settings.default_script_type
        });
        let steps = family
            .steps()
            .into_iter()
            .filter_map(|record| record.as_event_step())
            .map(|step| PlannedStep {
                name: step.name.clone(),
                code: step.code.clone(),
            })
            .collect();
        tracing::info!(original = %id, name = %start.name, "rerunning event");
        self.run_script_event(&start.name, script_type, &script, steps)
            .await
    }

    fn step_show(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let id = LogId(*required::<u64>(args, "id")?);
        let index = self.index()?;
        let step = index.step(id)?;
        print!("{}", display::detail(step));
        Ok(0)
    }

    fn workflow_list(&self) -> anyhow::Result<i32> {
        let catalogs = self.catalogs()?;
        if catalogs.workflows.is_empty() {
            println!("no workflows defined");
            return Ok(0);
        }
        for (name, workflow) in catalogs.workflows.iter() {
            let mut line = format!("{name:<24} {} nodes", workflow.graph.nodes.len());
            if let Some(description) = &workflow.description {
                line.push_str("  ");
                line.push_str(description);
            }
            println!("{line}");
        }
        Ok(0)
    }

    fn workflow_show(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let name = required::<String>(args, "name")?;
        let catalogs = self.catalogs()?;
        let Some(workflow) = catalogs.workflows.get(name) else {
            bail!("workflow '{name}' not found");
        };
        println!("Workflow: {name}");
        if let Some(description) = &workflow.description {
            println!("Description: {description}");
        }
        if let Some(script_type) = workflow.script_type {
            println!("Script-Type: {script_type}");
        }
        println!("Nodes:");
        for node in &workflow.graph.nodes {
            println!("  {:<16} {:<24} {}", node.id, node.operation, node.display_label());
        }
        if !workflow.graph.edges.is_empty() {
            println!("Edges:");
            for edge in &workflow.graph.edges {
                match &edge.source_handle {
                    Some(handle) => println!("  {} [{handle}] -> {}", edge.source, edge.target),
                    None => println!("  {} -> {}", edge.source, edge.target),
                }
            }
        }

        let assembler = Assembler::new(&catalogs.custom_nodes, &catalogs.commands);
        let plan = match assembler.plan(&workflow.graph) {
            Ok(plan) => plan,
            Err(e) => {
                println!("Order: {e}");
                return Ok(1);
            }
        };
        println!("Order: {}", plan.ordered_ids(&workflow.graph).join(" -> "));
        for &pos in plan.order() {
            for branch in plan.branches_of(pos) {
                let ids = branch
                    .order
                    .iter()
                    .map(|&p| workflow.graph.nodes[p].id.as_str())
                    .collect::<Vec<_>>();
                println!(
                    "  {} [{}]: {}",
                    workflow.graph.nodes[pos].id,
                    branch.handle,
                    ids.join(" -> ")
                );
            }
        }
        Ok(0)
    }

    /// Assemble a named workflow with the configured compiler and invoker
    fn assemble_workflow(
        &self,
        name: &str,
        requested: Option<ScriptType>,
    ) -> anyhow::Result<AssembledScript> {
        let catalogs = self.catalogs()?;
        let Some(workflow) = catalogs.workflows.get(name) else {
            bail!("workflow '{name}' not found");
        };
        let settings = &self.config.settings;
        let script_type = requested
            .or(workflow.script_type)
            .unwrap_or(settings.default_script_type);
        let history = self.history();
        let mut assembler = Assembler::new(&catalogs.custom_nodes, &catalogs.commands)
            .with_compiler(settings.compiler())
            .with_invoker(settings.invoker.clone());
        if let Some(index) = &history {
            assembler = assembler.with_history(index);
        }
        Ok(assembler.assemble(name, &workflow.graph, script_type)?)
    }

    fn workflow_build(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let name = required::<String>(args, "name")?;
        let script = self.assemble_workflow(name, script_type_flag(args)?)?;
        emit(&script, args.get_one::<PathBuf>("output"))?;
        Ok(0)
    }

    async fn workflow_run(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let name = required::<String>(args, "name")?;
        let script = self.assemble_workflow(name, script_type_flag(args)?)?;
        let steps = script
            .sections
            .iter()
            .map(|section| PlannedStep {
                name: section.label.clone(),
                code: Some(section.code.clone()),
            })
            .collect();
        self.run_script_event(name, script.script_type, &script.text(), steps)
            .await
    }

    /// Record an event around one script execution.
    ///
    /// ```text
    /// event-start (script) ─► event-step × n ─► run script ─► event-end
    /// ```
    async fn run_script_event(
        &self,
        name: &str,
        script_type: ScriptType,
        script: &str,
        steps: Vec<PlannedStep>,
    ) -> anyhow::Result<i32> {
        let event = self.recorder.record(Payload::EventStart(EventStart {
            name: name.to_string(),
            script_type: script_type.as_str().to_string(),
            total_steps: count(steps.len()),
            script: Some(script.to_string()),
        }));
        if let Some(parent) = event {
            for (index, step) in steps.into_iter().enumerate() {
                self.recorder.record(Payload::EventStep(EventStep {
                    parent,
                    step_number: count(index + 1),
                    name: step.name,
                    code: step.code,
                    planned: true,
                }));
            }
        }

        let mut file = tempfile::Builder::new()
            .prefix("cmdflow-")
            .suffix(&format!(".{}", script_type.extension()))
            .tempfile()
            .context("creating a scratch script file")?;
        file.write_all(script.as_bytes())
            .and_then(|()| file.flush())
            .context("writing the scratch script file")?;
        let path = file.into_temp_path();

        let settings = &self.config.settings;
        let mut command = script_command(script_type, settings.shell.as_deref(), &path);
        inherit_session(&mut command, self.recorder.session());
        tracing::info!(name, event = ?event, "running script");
        let output = run_teed(command)
            .await
            .with_context(|| format!("running script for '{name}'"))?;

        if let Some(parent) = event {
            self.recorder.record(Payload::EventEnd(EventEnd {
                parent,
                name: name.to_string(),
                exit_code: output.exit_code,
                duration_ms: output.duration_ms,
                stdout: output.stdout,
                stderr: output.stderr,
            }));
        }
        Ok(output.exit_code)
    }

    fn build_from_steps(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let ids = args
            .get_many::<u64>("ids")
            .context("missing step ids")?
            .map(|&id| LogId(id))
            .collect::<Vec<_>>();
        let index = self.index()?;
        let script = build_from_steps(&index, &ids, self.config.settings.default_script_type)?;
        emit(&script, args.get_one::<PathBuf>("output"))?;
        Ok(0)
    }

    fn event_start(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let name = required::<String>(args, "name")?;
        let script_type = script_type_flag(args)?.unwrap_or(self.config.settings.default_script_type);
        let script = args
            .get_one::<PathBuf>("script-file")
            .map(|path| {
                fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
            })
            .transpose()?;
        let id = self.append(Payload::EventStart(EventStart {
            name: name.clone(),
            script_type: script_type.as_str().to_string(),
            total_steps: *required::<u32>(args, "total")?,
            script,
        }))?;
        println!("{id}");
        Ok(0)
    }

    fn event_step(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let id = self.append(Payload::EventStep(EventStep {
            parent: LogId(*required::<u64>(args, "parent")?),
            step_number: *required::<u32>(args, "number")?,
            name: required::<String>(args, "name")?.clone(),
            code: args.get_one::<String>("code").cloned(),
            planned: false,
        }))?;
        println!("{id}");
        Ok(0)
    }

    fn event_end(&self, args: &ArgMatches) -> anyhow::Result<i32> {
        let parent = LogId(*required::<u64>(args, "parent")?);
        let name = match args.get_one::<String>("name") {
            Some(name) => name.clone(),
            None => self.start_name(parent),
        };
        let id = self.append(Payload::EventEnd(EventEnd {
            parent,
            name,
            exit_code: *required::<i32>(args, "exit-code")?,
            duration_ms: *required::<u64>(args, "duration")?,
            stdout: String::new(),
            stderr: String::new(),
        }))?;
        println!("{id}");
        Ok(0)
    }

    /// Name of the start record `parent`, or a generic one
    fn start_name(&self, parent: LogId) -> String {
        match self.store().find(parent) {
            Ok(Some(record)) => record
                .as_event_start()
                .map_or_else(|| "event".to_string(), |start| start.name.clone()),
            Ok(None) => {
                tracing::debug!(%parent, "event end for an unknown start");
                "event".to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, %parent, "could not look up event start");
                "event".to_string()
            }
        }
    }
}

/// Print a script, or write it to `output`
fn emit(script: &AssembledScript, output: Option<&PathBuf>) -> anyhow::Result<()> {
    let text = script.text();
    let Some(path) = output else {
        print!("{text}");
        return Ok(());
    };
    fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        if script.script_type == ScriptType::Bash {
            make_executable(path)?;
        }
    }
    eprintln!("wrote {} ({} sections)", path.display(), script.len());
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)
        .with_context(|| format!("reading permissions of {}", path.display()))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("making {} executable", path.display()))
}
