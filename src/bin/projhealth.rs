use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use projhealth::metrics::history::DEFAULT_SERIES_DAYS;
use projhealth::metrics::velocity::{DEFAULT_COMPLETION_DAYS, DEFAULT_VELOCITY_WEEKS};
use projhealth::{
    Milestone, Priority, ProjectHealth, ProjectStatus, Task, TaskStatus, WeightsUpdate,
};

#[derive(Parser)]
#[command(name = "projhealth", about = "Project health and risk analytics")]
struct Cli {
    /// Database path (default: ~/.projhealth/projhealth.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Manage tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Log hours against a task
    Log {
        /// Task ID
        task: String,
        /// Hours worked (must be positive)
        #[arg(allow_negative_numbers = true)]
        hours: f64,
        #[arg(long)]
        note: Option<String>,
        /// Who did the work
        #[arg(long)]
        by: Option<String>,
    },
    /// Manage milestones
    Milestone {
        #[command(subcommand)]
        action: MilestoneAction,
    },
    /// Manage project dependencies
    Deps {
        #[command(subcommand)]
        action: DepsAction,
    },
    /// Show a project's event log, newest first
    Events {
        project: String,
        /// Maximum events to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Compute a project's health score
    Health {
        project: String,
        /// Record today's score in the health history
        #[arg(long)]
        snapshot: bool,
    },
    /// Compute a project's risk score
    Risk { project: String },
    /// Weekly velocity
    Velocity {
        project: String,
        #[arg(long, default_value_t = DEFAULT_VELOCITY_WEEKS)]
        weeks: usize,
    },
    /// Burndown over a date range
    Burndown {
        project: String,
        /// Range (e.g. 30d, 2025-03, 2025-Q1, mtd, 2025-01-01..2025-02-15)
        #[arg(long, default_value = "30d")]
        range: String,
    },
    /// Daily completion rate
    Completion {
        project: String,
        #[arg(long, default_value_t = DEFAULT_COMPLETION_DAYS)]
        days: usize,
    },
    /// Estimate accuracy per task
    Accuracy { project: String },
    /// Health score history, oldest first
    History {
        project: String,
        #[arg(long, default_value_t = DEFAULT_SERIES_DAYS)]
        days: usize,
    },
    /// Show or change the health weights
    Weights {
        #[command(subcommand)]
        action: WeightsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Add {
        name: String,
        /// Active, "In Progress", Paused or Completed
        #[arg(long)]
        status: Option<String>,
        /// Deadline (YYYY-MM-DD)
        #[arg(long)]
        deadline: Option<String>,
    },
    /// List projects, starred first
    List,
    /// Show one project
    Show { id: String },
    /// Set a project's status ("none" clears it)
    Status { id: String, status: String },
    /// Set a project's deadline ("none" clears it)
    Deadline { id: String, date: String },
    /// Star a project
    Star { id: String },
    /// Unstar a project
    Unstar { id: String },
    /// Delete a project and its tasks, milestones and history
    Remove { id: String },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Add a task to a project
    Add {
        project: String,
        title: String,
        /// todo, in-progress, review or done
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
        /// low, medium or high
        #[arg(long)]
        priority: Option<String>,
        /// Milestone ID
        #[arg(long)]
        milestone: Option<String>,
        /// Estimated hours
        #[arg(long)]
        estimate: Option<f64>,
    },
    /// List a project's tasks
    List { project: String },
    /// Change a task's status
    Status { id: String, status: String },
    /// Delete a task and its time logs
    Remove { id: String },
}

#[derive(Subcommand)]
enum MilestoneAction {
    /// Add a milestone to a project
    Add {
        project: String,
        title: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// Target date (YYYY-MM-DD)
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List a project's milestones
    List { project: String },
    /// Delete a milestone; its tasks are unlinked
    Remove { id: String },
}

#[derive(Subcommand)]
enum DepsAction {
    /// Replace a project's dependencies
    Set {
        project: String,
        /// Project IDs this project depends on
        depends_on: Vec<String>,
    },
    /// Show a project's dependencies
    Show { project: String },
}

#[derive(Subcommand)]
enum WeightsAction {
    /// Show the current weights
    Show,
    /// Change one or more weights
    Set {
        /// Penalty per overdue task
        #[arg(long)]
        per_task: Option<u32>,
        /// Cap on the overdue task penalty
        #[arg(long)]
        task_cap: Option<u32>,
        /// Penalty per overdue milestone
        #[arg(long)]
        per_milestone: Option<u32>,
        /// Cap on the overdue milestone penalty
        #[arg(long)]
        milestone_cap: Option<u32>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

fn parse_date_arg(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date '{s}', expected YYYY-MM-DD"))
}

fn parse_optional_date(s: Option<&str>) -> anyhow::Result<Option<NaiveDate>> {
    s.map(parse_date_arg).transpose()
}

/// Parse a project status, with "none" meaning no status.
fn parse_project_status(s: &str) -> anyhow::Result<Option<ProjectStatus>> {
    if s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    ProjectStatus::parse(s)
        .map(Some)
        .ok_or_else(|| anyhow::anyhow!("Unknown project status: {s}. Use: Active, \"In Progress\", Paused, Completed, none"))
}

fn parse_task_status(s: &str) -> anyhow::Result<TaskStatus> {
    TaskStatus::parse(s)
        .ok_or_else(|| anyhow::anyhow!("Unknown task status: {s}. Use: todo, in-progress, review, done"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => projhealth::Database::open_at(path).await?,
        None => projhealth::Database::open().await?,
    };
    let ph = ProjectHealth::new(db);
    let json = cli.json;

    match cli.command {
        Commands::Project { action } => handle_project(&ph, action, json).await?,
        Commands::Task { action } => handle_task(&ph, action, json).await?,
        Commands::Log { task, hours, note, by } => {
            match ph.log_time(&task, hours, note.as_deref(), by.as_deref()).await? {
                Some(entry) if json => print_json(&entry)?,
                Some(entry) => {
                    let total = ph.task(&entry.task_id).await?.logged_hours;
                    println!("Logged {}h on {} (total {total}h)", entry.hours, entry.task_id);
                }
                None => anyhow::bail!(
                    "Time not logged: hours must be a positive number and task {task} must exist"
                ),
            }
        }
        Commands::Milestone { action } => handle_milestone(&ph, action, json).await?,
        Commands::Deps { action } => handle_deps(&ph, action, json).await?,
        Commands::Events { project, limit } => {
            let events: Vec<_> = ph.events(&project).await?.into_iter().take(limit).collect();
            if json {
                print_json(&events)?;
            } else if events.is_empty() {
                println!("No events.");
            } else {
                for e in &events {
                    let data = e.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
                    println!(
                        "{} {:<7} {data}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.event_type.as_str()
                    );
                }
            }
        }
        Commands::Health { project, snapshot } => {
            let report = ph.health(&project, snapshot).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("Health: {} ({})", report.score, report.status.as_str());
                println!("  Deadline:      {}", report.factors.deadline);
                println!("  Activity:      {}", report.factors.activity);
                println!("  Completion:    {}", report.factors.completion);
                println!("  Dependencies:  {}", report.factors.dependencies);
                println!("  Overdue tasks:      {}", report.overdue_tasks);
                println!("  Overdue milestones: {}", report.overdue_milestones);
                println!("  Blocked by:         {}", report.incomplete_dependencies);
                if snapshot {
                    println!("Snapshot recorded.");
                }
            }
        }
        Commands::Risk { project } => {
            let report = ph.risk(&project).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("Risk: {:.1} ({})", report.score, report.level.as_str());
                println!("  Overdue:            {:.1}", report.factors.overdue);
                println!("  Velocity:           {:.1}", report.factors.velocity);
                println!("  Blockers:           {:.1}", report.factors.blockers);
                println!("  Deadline:           {:.1}", report.factors.deadline);
                println!("  Estimate accuracy:  {:.1}", report.factors.estimate_accuracy);
                println!("Recommendations:");
                for r in &report.recommendations {
                    println!("  - {r}");
                }
            }
        }
        Commands::Velocity { project, weeks } => {
            let report = ph.velocity(&project, weeks).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("{:<12} {:>9} {:>8} {:>8}", "week ending", "completed", "points", "rolling");
                for w in &report.weeks {
                    println!(
                        "{:<12} {:>9} {:>8.1} {:>8.2}",
                        w.end.format("%Y-%m-%d"),
                        w.completed,
                        w.points,
                        w.rolling_average
                    );
                }
                println!(
                    "Average: {:.2}/week, trend: {:?}",
                    report.average_completed, report.trend
                );
            }
        }
        Commands::Burndown { project, range } => {
            let today = Utc::now().date_naive();
            let range = projhealth::parse_range(&range, today)?;
            let points = ph.burndown(&project, range).await?;
            if json {
                print_json(&points)?;
            } else {
                println!("{:<12} {:>8} {:>7}", "date", "ideal", "actual");
                for p in &points {
                    println!("{:<12} {:>8.1} {:>7}", p.date, p.ideal, p.actual);
                }
            }
        }
        Commands::Completion { project, days } => {
            let rates = ph.completion_rate(&project, days).await?;
            if json {
                print_json(&rates)?;
            } else {
                for r in &rates {
                    println!("{}  {:>3} tasks  {:>5.1}%", r.date, r.completed, r.rate * 100.0);
                }
            }
        }
        Commands::Accuracy { project } => {
            let acc = ph.estimate_accuracy(&project).await?;
            if json {
                print_json(&acc)?;
            } else if acc.tasks.is_empty() {
                println!("No tasks with both an estimate and logged hours.");
            } else {
                for t in &acc.tasks {
                    println!(
                        "{:<40} est {:>6.1}h  logged {:>6.1}h  {:>+7.1}%  {:?}",
                        t.title, t.estimate_hours, t.logged_hours, t.variance, t.class
                    );
                }
                println!(
                    "Average variance: {:.1}%  accurate: {:.1}% (over {}, under {}, accurate {})",
                    acc.average_variance,
                    acc.accuracy_rate,
                    acc.over_count,
                    acc.under_count,
                    acc.accurate_count
                );
            }
        }
        Commands::History { project, days } => {
            let series = ph.health_series(&project, days).await?;
            if json {
                print_json(&series)?;
            } else {
                let today = Utc::now().date_naive();
                let first = today - chrono::Duration::days(series.len() as i64 - 1);
                for (i, score) in series.iter().enumerate() {
                    println!("{}  {score}", first + chrono::Duration::days(i as i64));
                }
            }
        }
        Commands::Weights { action } => handle_weights(&ph, action, json).await?,
        Commands::Config { action } => handle_config(&ph, action).await?,
    }

    Ok(())
}

async fn handle_project(ph: &ProjectHealth, action: ProjectAction, json: bool) -> anyhow::Result<()> {
    let print_project = |p: &projhealth::Project| -> anyhow::Result<()> {
        if json {
            return print_json(p);
        }
        let star = if p.starred { "*" } else { " " };
        let status = p.status.map(|s| s.as_str()).unwrap_or("-");
        let deadline = p
            .deadline
            .map(|d| d.to_string())
            .unwrap_or_else(|| "no deadline".to_string());
        println!("{star} {} {} [{status}] {deadline}", p.id, p.name);
        Ok(())
    };

    match action {
        ProjectAction::Add { name, status, deadline } => {
            let status = match status {
                Some(s) => parse_project_status(&s)?,
                None => None,
            };
            let deadline = parse_optional_date(deadline.as_deref())?;
            let project = ph.create_project(&name, status, deadline).await?;
            print_project(&project)?;
        }
        ProjectAction::List => {
            let projects = ph.projects().await?;
            if json {
                print_json(&projects)?;
            } else if projects.is_empty() {
                println!("No projects.");
            } else {
                for p in &projects {
                    print_project(p)?;
                }
            }
        }
        ProjectAction::Show { id } => print_project(&ph.project(&id).await?)?,
        ProjectAction::Status { id, status } => {
            let project = ph.set_project_status(&id, parse_project_status(&status)?).await?;
            print_project(&project)?;
        }
        ProjectAction::Deadline { id, date } => {
            let deadline = if date.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_date_arg(&date)?)
            };
            let project = ph.set_project_deadline(&id, deadline).await?;
            print_project(&project)?;
        }
        ProjectAction::Star { id } => print_project(&ph.star_project(&id, true).await?)?,
        ProjectAction::Unstar { id } => print_project(&ph.star_project(&id, false).await?)?,
        ProjectAction::Remove { id } => {
            if ph.delete_project(&id).await? {
                println!("Removed: {id}");
            } else {
                println!("Not found: {id}");
            }
        }
    }
    Ok(())
}

async fn handle_task(ph: &ProjectHealth, action: TaskAction, json: bool) -> anyhow::Result<()> {
    let print_task = |t: &Task| -> anyhow::Result<()> {
        if json {
            return print_json(t);
        }
        let due = t.due.map(|d| d.to_string()).unwrap_or_else(|| "no due date".to_string());
        let assignee = t.assignee.as_deref().unwrap_or("unassigned");
        let estimate = t
            .estimate_hours
            .map(|h| format!("{h}h"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{}] {} {} - {assignee} | due: {due} | est {estimate}, logged {}h",
            t.status, t.id, t.title, t.logged_hours
        );
        Ok(())
    };

    match action {
        TaskAction::Add {
            project,
            title,
            status,
            assignee,
            due,
            priority,
            milestone,
            estimate,
        } => {
            let mut task = Task::new(&project, &title);
            if let Some(s) = status {
                task.status = parse_task_status(&s)?;
            }
            if let Some(p) = priority {
                task.priority = Some(
                    Priority::parse(&p)
                        .ok_or_else(|| anyhow::anyhow!("Unknown priority: {p}. Use: low, medium, high"))?,
                );
            }
            task.assignee = assignee;
            task.due = parse_optional_date(due.as_deref())?;
            task.milestone_id = milestone;
            task.estimate_hours = estimate;
            let task = ph.add_task(task).await?;
            print_task(&task)?;
        }
        TaskAction::List { project } => {
            let tasks = ph.tasks(&project).await?;
            if json {
                print_json(&tasks)?;
            } else if tasks.is_empty() {
                println!("No tasks found.");
            } else {
                for t in &tasks {
                    print_task(t)?;
                }
            }
        }
        TaskAction::Status { id, status } => {
            let task = ph.set_task_status(&id, parse_task_status(&status)?).await?;
            print_task(&task)?;
        }
        TaskAction::Remove { id } => {
            if ph.delete_task(&id).await? {
                println!("Removed: {id}");
            } else {
                println!("Not found: {id}");
            }
        }
    }
    Ok(())
}

async fn handle_milestone(ph: &ProjectHealth, action: MilestoneAction, json: bool) -> anyhow::Result<()> {
    match action {
        MilestoneAction::Add {
            project,
            title,
            start,
            target,
            description,
        } => {
            let mut milestone = Milestone::new(&project, &title);
            milestone.start = parse_optional_date(start.as_deref())?;
            milestone.target = parse_optional_date(target.as_deref())?;
            milestone.description = description;
            let milestone = ph.add_milestone(milestone).await?;
            if json {
                print_json(&milestone)?;
            } else {
                println!("Added milestone {} ({})", milestone.title, milestone.id);
            }
        }
        MilestoneAction::List { project } => {
            let milestones = ph.milestones(&project).await?;
            if json {
                print_json(&milestones)?;
            } else if milestones.is_empty() {
                println!("No milestones.");
            } else {
                for m in &milestones {
                    let target = m
                        .target
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "no target".to_string());
                    println!("{} {} (target: {target})", m.id, m.title);
                }
            }
        }
        MilestoneAction::Remove { id } => {
            if ph.delete_milestone(&id).await? {
                println!("Removed: {id}");
            } else {
                println!("Not found: {id}");
            }
        }
    }
    Ok(())
}

async fn handle_deps(ph: &ProjectHealth, action: DepsAction, json: bool) -> anyhow::Result<()> {
    let deps = match action {
        DepsAction::Set { project, depends_on } => ph.set_dependencies(&project, &depends_on).await?,
        DepsAction::Show { project } => ph.dependencies(&project).await?,
    };
    if json {
        print_json(&deps)?;
    } else if deps.is_empty() {
        println!("No dependencies.");
    } else {
        for d in &deps {
            println!("{d}");
        }
    }
    Ok(())
}

async fn handle_weights(ph: &ProjectHealth, action: WeightsAction, json: bool) -> anyhow::Result<()> {
    let weights = match action {
        WeightsAction::Show => ph.weights().await?,
        WeightsAction::Set {
            per_task,
            task_cap,
            per_milestone,
            milestone_cap,
        } => {
            let update = WeightsUpdate {
                overdue_penalty_per_task: per_task,
                overdue_penalty_cap: task_cap,
                milestone_overdue_penalty_per_milestone: per_milestone,
                milestone_overdue_penalty_cap: milestone_cap,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to set. Pass at least one of --per-task, --task-cap, --per-milestone, --milestone-cap");
            }
            ph.set_weights(&update).await?
        }
    };
    if json {
        print_json(&weights)?;
    } else {
        println!("Overdue task penalty:      {} each, capped at {}", weights.overdue_penalty_per_task, weights.overdue_penalty_cap);
        println!(
            "Overdue milestone penalty: {} each, capped at {}",
            weights.milestone_overdue_penalty_per_milestone, weights.milestone_overdue_penalty_cap
        );
    }
    Ok(())
}

async fn handle_config(ph: &ProjectHealth, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match ph.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            ph.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = ph.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
