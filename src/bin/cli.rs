use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const SESSION_FILE: &str = ".session";

fn api_url() -> String {
    std::env::var("TIMETRACK_API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

#[derive(Parser)]
#[command(name = "timetrack")]
#[command(about = "A CLI client for the timetrack service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a new account")]
    Signup {
        #[arg(short, long, help = "Username")]
        username: String,

        #[arg(short, long, help = "Email address")]
        email: String,

        #[arg(short, long, help = "Password")]
        password: String,
    },

    #[command(about = "Log in to your account")]
    Login {
        #[arg(short, long, help = "Username")]
        username: String,

        #[arg(short, long, help = "Password")]
        password: String,
    },

    #[command(about = "Log out of your account")]
    Logout,

    #[command(about = "Show current user")]
    Whoami,

    #[command(subcommand, about = "Manage subjects")]
    Subject(SubjectCommands),

    #[command(subcommand, about = "Manage tags")]
    Tag(TagCommands),

    #[command(subcommand, about = "Manage time logs")]
    Log(LogCommands),

    #[command(about = "Show the time-spent charts")]
    Charts {
        #[arg(short, long, help = "Start date (YYYY-MM-DD)")]
        start: Option<String>,

        #[arg(short, long, help = "End date (YYYY-MM-DD)")]
        end: Option<String>,
    },
}

#[derive(Subcommand)]
enum SubjectCommands {
    #[command(about = "Add a new subject")]
    Add {
        #[arg(short, long, help = "Subject name")]
        name: String,

        #[arg(short, long, default_value = "", help = "Description")]
        description: String,
    },

    #[command(about = "List your subjects")]
    List {
        #[arg(short, long, help = "Page number")]
        page: Option<usize>,
    },

    #[command(about = "Delete a subject and all its time logs")]
    Delete {
        #[arg(short, long, help = "Subject name")]
        name: String,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    #[command(about = "Add a new tag")]
    Add {
        #[arg(short, long, help = "Tag name")]
        name: String,
    },

    #[command(about = "List your tags")]
    List {
        #[arg(short, long, help = "Page number")]
        page: Option<usize>,
    },

    #[command(about = "Delete a tag (its time logs survive)")]
    Delete {
        #[arg(short, long, help = "Tag name")]
        name: String,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    #[command(about = "Record time spent on a subject")]
    Add {
        #[arg(short, long, help = "Subject name")]
        subject: String,

        #[arg(short = 'H', long, help = "Hours spent")]
        hours: u32,

        #[arg(short = 'M', long, help = "Minutes spent")]
        minutes: u32,

        #[arg(short, long, help = "Date (YYYY-MM-DD, defaults to today)")]
        date: Option<String>,

        #[arg(short, long, help = "Tags (comma-separated)")]
        tags: Option<String>,

        #[arg(short = 'D', long, default_value = "", help = "Description")]
        description: String,
    },

    #[command(about = "List your time logs")]
    List {
        #[arg(short, long, help = "Page number")]
        page: Option<usize>,
    },

    #[command(about = "Delete a time log")]
    Delete {
        #[arg(short, long, help = "Time log ID")]
        id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Session {
    token: String,
    username: String,
}

impl Session {
    fn save(&self) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(SESSION_FILE, json)?;
        Ok(())
    }

    fn load() -> Option<Self> {
        if Path::new(SESSION_FILE).exists() {
            let data = fs::read_to_string(SESSION_FILE).ok()?;
            serde_json::from_str(&data).ok()
        } else {
            None
        }
    }

    fn clear() -> Result<()> {
        if Path::new(SESSION_FILE).exists() {
            fs::remove_file(SESSION_FILE)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct Subject {
    id: String,
    name: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct SubjectListResponse {
    subjects: Vec<Subject>,
    page: usize,
    total_pages: usize,
}

#[derive(Debug, Deserialize)]
struct Tag {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
    tags: Vec<Tag>,
    page: usize,
    total_pages: usize,
}

#[derive(Debug, Deserialize)]
struct TimeLogView {
    id: String,
    date: NaiveDate,
    subject: String,
    tags: Vec<String>,
    duration: u32,
    description: String,
}

#[derive(Debug, Deserialize)]
struct TimeLogListResponse {
    timelogs: Vec<TimeLogView>,
    page: usize,
    total_pages: usize,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    label: Option<String>,
    data: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    labels: Vec<String>,
    datasets: Vec<Dataset>,
}

#[derive(Debug, Deserialize)]
struct HomeResponse {
    min_date: Option<NaiveDate>,
    max_date: Option<NaiveDate>,
    date_based: ChartData,
    subject_based: ChartData,
    tag_based: ChartData,
    timelogs: Vec<TimeLogView>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_command(cli.command).await {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_command(command: Commands) -> Result<()> {
    let client = reqwest::Client::new();

    match command {
        Commands::Signup {
            username,
            email,
            password,
        } => signup(&client, username, email, password).await,
        Commands::Login { username, password } => login(&client, username, password).await,
        Commands::Logout => logout(&client).await,
        Commands::Whoami => whoami(),
        Commands::Subject(command) => {
            let session = require_login()?;
            match command {
                SubjectCommands::Add { name, description } => {
                    add_subject(&client, &session, name, description).await
                }
                SubjectCommands::List { page } => list_subjects(&client, &session, page).await,
                SubjectCommands::Delete { name } => delete_subject(&client, &session, name).await,
            }
        }
        Commands::Tag(command) => {
            let session = require_login()?;
            match command {
                TagCommands::Add { name } => add_tag(&client, &session, name).await,
                TagCommands::List { page } => list_tags(&client, &session, page).await,
                TagCommands::Delete { name } => delete_tag(&client, &session, name).await,
            }
        }
        Commands::Log(command) => {
            let session = require_login()?;
            match command {
                LogCommands::Add {
                    subject,
                    hours,
                    minutes,
                    date,
                    tags,
                    description,
                } => add_log(&client, &session, subject, hours, minutes, date, tags, description)
                    .await,
                LogCommands::List { page } => list_logs(&client, &session, page).await,
                LogCommands::Delete { id } => delete_log(&client, &session, id).await,
            }
        }
        Commands::Charts { start, end } => {
            let session = require_login()?;
            charts(&client, &session, start, end).await
        }
    }
}

fn require_login() -> Result<Session> {
    Session::load().ok_or_else(|| {
        anyhow::anyhow!("You must be logged in. Use: cli login -u <username> -p <password>")
    })
}

fn whoami() -> Result<()> {
    if let Some(session) = Session::load() {
        println!("👤 Logged in as: {}", session.username);
    } else {
        println!("❌ Not logged in");
        println!("💡 Use 'cli login -u <username> -p <password>' to log in");
    }
    Ok(())
}

async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request.send().await?;
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    bail!("{}", format_error(status, &body))
}

/// Turns a 422 validation body into readable lines; other errors pass through.
fn format_error(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct Errors {
        #[serde(default)]
        errors: BTreeMap<String, Vec<String>>,
        #[serde(default)]
        non_field_errors: Vec<String>,
    }

    if status == StatusCode::UNPROCESSABLE_ENTITY {
        if let Ok(parsed) = serde_json::from_str::<Errors>(body) {
            let mut lines = Vec::new();
            for (field, messages) in &parsed.errors {
                for message in messages {
                    lines.push(format!("{field}: {message}"));
                }
            }
            lines.extend(parsed.non_field_errors);
            if !lines.is_empty() {
                return lines.join("\n");
            }
        }
    }
    format!("{status}: {body}")
}

async fn signup(
    client: &reqwest::Client,
    username: String,
    email: String,
    password: String,
) -> Result<()> {
    send(client.post(format!("{}/auth/signup", api_url())).json(&serde_json::json!({
        "username": username,
        "email": email,
        "password": password,
    })))
    .await?;

    println!("✅ Account created successfully!");
    println!("💡 You can now log in using: cli login -u {} -p <password>", username);
    Ok(())
}

async fn login(client: &reqwest::Client, username: String, password: String) -> Result<()> {
    let response = send(client.post(format!("{}/auth/login", api_url())).json(&serde_json::json!({
        "username": username,
        "password": password,
    })))
    .await?;
    let login: LoginResponse = response.json().await?;

    Session {
        token: login.token,
        username: login.username.clone(),
    }
    .save()?;

    println!("✅ Login successful!");
    println!("👤 Welcome back, {}!", login.username);
    Ok(())
}

async fn logout(client: &reqwest::Client) -> Result<()> {
    if let Some(session) = Session::load() {
        // Best effort: the local session is cleared even if the server is down.
        let _ = client
            .post(format!("{}/auth/logout", api_url()))
            .bearer_auth(&session.token)
            .send()
            .await;
    }
    Session::clear()?;
    println!("✅ Logged out successfully!");
    Ok(())
}

async fn add_subject(
    client: &reqwest::Client,
    session: &Session,
    name: String,
    description: String,
) -> Result<()> {
    let response = send(
        client
            .post(format!("{}/subjects", api_url()))
            .bearer_auth(&session.token)
            .json(&serde_json::json!({ "name": name, "description": description })),
    )
    .await?;
    let subject: Subject = response.json().await?;

    println!("✅ Subject \"{}\" added!", subject.name);
    Ok(())
}

async fn list_subjects(
    client: &reqwest::Client,
    session: &Session,
    page: Option<usize>,
) -> Result<()> {
    let response = send(
        client
            .get(format!("{}/subjects", api_url()))
            .query(&[("page", page.unwrap_or(1))])
            .bearer_auth(&session.token),
    )
    .await?;
    let result: SubjectListResponse = response.json().await?;

    if result.subjects.is_empty() {
        println!("📭 No subjects yet.");
        println!("💡 Use 'cli subject add -n <name>' to create one");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Name"),
        Cell::new("Description"),
        Cell::new("ID"),
    ]));
    for subject in result.subjects {
        table.add_row(Row::new(vec![
            Cell::new(&subject.name),
            Cell::new(&subject.description),
            Cell::new(&subject.id[..8]),
        ]));
    }
    table.printstd();
    println!("Page {} of {}", result.page, result.total_pages);
    Ok(())
}

async fn delete_subject(client: &reqwest::Client, session: &Session, name: String) -> Result<()> {
    let subject = find_subject(client, session, &name).await?;
    send(
        client
            .delete(format!("{}/subjects/{}", api_url(), subject.id))
            .bearer_auth(&session.token),
    )
    .await?;

    println!("✅ Subject \"{}\" and its time logs deleted!", subject.name);
    Ok(())
}

async fn add_tag(client: &reqwest::Client, session: &Session, name: String) -> Result<()> {
    let response = send(
        client
            .post(format!("{}/tags", api_url()))
            .bearer_auth(&session.token)
            .json(&serde_json::json!({ "name": name })),
    )
    .await?;
    let tag: Tag = response.json().await?;

    println!("✅ Tag \"{}\" added!", tag.name);
    Ok(())
}

async fn list_tags(client: &reqwest::Client, session: &Session, page: Option<usize>) -> Result<()> {
    let response = send(
        client
            .get(format!("{}/tags", api_url()))
            .query(&[("page", page.unwrap_or(1))])
            .bearer_auth(&session.token),
    )
    .await?;
    let result: TagListResponse = response.json().await?;

    if result.tags.is_empty() {
        println!("📭 No tags yet.");
        println!("💡 Use 'cli tag add -n <name>' to create one");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("Name"), Cell::new("ID")]));
    for tag in result.tags {
        table.add_row(Row::new(vec![Cell::new(&tag.name), Cell::new(&tag.id[..8])]));
    }
    table.printstd();
    println!("Page {} of {}", result.page, result.total_pages);
    Ok(())
}

async fn delete_tag(client: &reqwest::Client, session: &Session, name: String) -> Result<()> {
    let tag = find_tag(client, session, &name).await?;
    send(
        client
            .delete(format!("{}/tags/{}", api_url(), tag.id))
            .bearer_auth(&session.token),
    )
    .await?;

    println!("✅ Tag \"{}\" deleted (time logs kept)!", tag.name);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn add_log(
    client: &reqwest::Client,
    session: &Session,
    subject: String,
    hours: u32,
    minutes: u32,
    date: Option<String>,
    tags: Option<String>,
    description: String,
) -> Result<()> {
    let date = match date {
        Some(raw) => raw
            .parse::<NaiveDate>()
            .context("Invalid date format. Use YYYY-MM-DD")?,
        None => Local::now().date_naive(),
    };

    let subject = find_subject(client, session, &subject).await?;

    let mut tag_ids = Vec::new();
    if let Some(tags) = tags {
        for name in tags.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            tag_ids.push(find_tag(client, session, name).await?.id);
        }
    }

    send(
        client
            .post(format!("{}/timelogs", api_url()))
            .bearer_auth(&session.token)
            .json(&serde_json::json!({
                "subject_id": subject.id,
                "tag_ids": tag_ids,
                "hours": hours,
                "minutes": minutes,
                "date": date,
                "description": description,
            })),
    )
    .await?;

    println!("✅ Record successfully added!");
    println!(
        "   {} on \"{}\" for {}",
        date,
        subject.name,
        hours_and_minutes(hours * 60 + minutes)
    );
    Ok(())
}

async fn list_logs(client: &reqwest::Client, session: &Session, page: Option<usize>) -> Result<()> {
    let response = send(
        client
            .get(format!("{}/timelogs", api_url()))
            .query(&[("page", page.unwrap_or(1))])
            .bearer_auth(&session.token),
    )
    .await?;
    let result: TimeLogListResponse = response.json().await?;

    if result.timelogs.is_empty() {
        println!("📭 No time logs yet.");
        println!("💡 Use 'cli log add -s <subject> -H <hours> -M <minutes>' to record one");
        return Ok(());
    }

    print_timelog_table(&result.timelogs);
    println!("Page {} of {}", result.page, result.total_pages);
    Ok(())
}

async fn delete_log(client: &reqwest::Client, session: &Session, id: String) -> Result<()> {
    send(
        client
            .delete(format!("{}/timelogs/{}", api_url(), id))
            .bearer_auth(&session.token),
    )
    .await?;

    println!("✅ Record successfully deleted!");
    Ok(())
}

async fn charts(
    client: &reqwest::Client,
    session: &Session,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    let mut request = client
        .get(format!("{}/home", api_url()))
        .bearer_auth(&session.token);
    if let (Some(start), Some(end)) = (&start, &end) {
        request = request.query(&[("start", start), ("end", end)]);
    }
    let response = send(request).await?;
    let home: HomeResponse = response.json().await?;

    match (home.min_date, home.max_date) {
        (Some(min), Some(max)) => println!("\n📊 Time spent between {} and {}\n", min, max),
        _ => println!("\n📭 No records yet. Charts will appear once you log some time.\n"),
    }

    if !home.date_based.labels.is_empty() {
        println!("📅 Hours per day");
        let mut table = Table::new();
        let mut header = vec![Cell::new("Date")];
        for dataset in &home.date_based.datasets {
            header.push(Cell::new(dataset.label.as_deref().unwrap_or("-")));
        }
        table.add_row(Row::new(header));
        for (i, label) in home.date_based.labels.iter().enumerate() {
            let mut row = vec![Cell::new(label)];
            for dataset in &home.date_based.datasets {
                row.push(Cell::new(&format!("{:.1}", dataset.data[i])));
            }
            table.add_row(Row::new(row));
        }
        table.printstd();
        println!();
    }

    print_share_table("📚 Hours per subject", &home.subject_based);
    print_share_table("🏷️  Hours per tag", &home.tag_based);

    if !home.timelogs.is_empty() {
        println!("🕒 Recent records");
        print_timelog_table(&home.timelogs);
    }
    Ok(())
}

fn print_share_table(title: &str, chart: &ChartData) {
    if chart.labels.is_empty() {
        return;
    }
    println!("{title}");
    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("Name"), Cell::new("Hours")]));
    if let Some(dataset) = chart.datasets.first() {
        for (label, hours) in chart.labels.iter().zip(&dataset.data) {
            table.add_row(Row::new(vec![
                Cell::new(label),
                Cell::new(&format!("{hours:.1}")),
            ]));
        }
    }
    table.printstd();
    println!();
}

fn print_timelog_table(timelogs: &[TimeLogView]) {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Date"),
        Cell::new("Subject"),
        Cell::new("Tags"),
        Cell::new("Duration"),
        Cell::new("Description"),
        Cell::new("ID"),
    ]));
    for log in timelogs {
        table.add_row(Row::new(vec![
            Cell::new(&log.date.to_string()),
            Cell::new(&log.subject),
            Cell::new(&log.tags.join(", ")),
            Cell::new(&hours_and_minutes(log.duration)),
            Cell::new(&log.description),
            Cell::new(&log.id[..8]),
        ]));
    }
    table.printstd();
}

fn hours_and_minutes(minutes: u32) -> String {
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}

async fn find_subject(
    client: &reqwest::Client,
    session: &Session,
    name: &str,
) -> Result<Subject> {
    let wanted = name.to_lowercase();
    let mut page = 1;
    loop {
        let response = send(
            client
                .get(format!("{}/subjects", api_url()))
                .query(&[("page", page)])
                .bearer_auth(&session.token),
        )
        .await?;
        let result: SubjectListResponse = response.json().await?;
        if let Some(subject) = result.subjects.into_iter().find(|s| s.name == wanted) {
            return Ok(subject);
        }
        if page >= result.total_pages {
            bail!("No subject named \"{}\". Use 'cli subject list' to see yours.", name);
        }
        page += 1;
    }
}

async fn find_tag(client: &reqwest::Client, session: &Session, name: &str) -> Result<Tag> {
    let wanted = name.to_lowercase();
    let mut page = 1;
    loop {
        let response = send(
            client
                .get(format!("{}/tags", api_url()))
                .query(&[("page", page)])
                .bearer_auth(&session.token),
        )
        .await?;
        let result: TagListResponse = response.json().await?;
        if let Some(tag) = result.tags.into_iter().find(|t| t.name == wanted) {
            return Ok(tag);
        }
        if page >= result.total_pages {
            bail!("No tag named \"{}\". Use 'cli tag list' to see yours.", name);
        }
        page += 1;
    }
}
