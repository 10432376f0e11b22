use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orgchart::core::Identifier;
use orgchart::directory::{self, CompanyInfo, Employee};
use orgchart::loader::FileForestSource;
use orgchart::projectors::tree_projector::{EmptyState, ViewNode};
use orgchart::selection::SelectionSummary;
use orgchart::{Explorer, SelectionMark};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "orgchart",
    about = "Browse an organization chart and resolve selections into people",
    version
)]
struct Cli {
    /// Enable debug logging on stderr.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Index a tree file and report its size or the id problem found.
    Validate(ValidateArgs),

    /// Print the visible tree with selection markers.
    Tree(TreeArgs),

    /// Show the details pane for one organization.
    Show(ShowArgs),

    /// Print the consolidated selection summary.
    Summary(SummaryArgs),

    /// Emit the selected people as recipient JSON.
    Recipients(RecipientsArgs),

    /// Emit one organization and everything under it as tree JSON.
    Subtree(SubtreeArgs),

    /// Look up a single person.
    Person(PersonArgs),

    /// Build a tree file from flat employee records.
    Import(ImportArgs),
}

#[derive(Debug, Args)]
struct ValidateArgs {
    /// JSON file holding the organization forest.
    input: PathBuf,
}

/// Selection commands replayed in order: org selections, org deselections, people.
///
/// Ids stay raw until a tree is loaded; `42` matches either `42` or `"42"` there.
#[derive(Debug, Args)]
struct SelectionArgs {
    /// Select an organization together with everything under it.
    #[arg(long = "select-org", value_name = "ID")]
    select_org: Vec<String>,
    /// Deselect an organization subtree after the selections above.
    #[arg(long = "deselect-org", value_name = "ID")]
    deselect_org: Vec<String>,
    /// Select an individual person.
    #[arg(long = "select-person", value_name = "ID")]
    select_person: Vec<String>,
}

#[derive(Debug, Args)]
struct TreeArgs {
    input: PathBuf,
    #[command(flatten)]
    selection: SelectionArgs,
    /// Only show organizations whose name (or a descendant's) contains this text.
    #[arg(long)]
    search: Option<String>,
    /// Toggle expansion of these organizations.
    #[arg(long, value_name = "ID")]
    expand: Vec<String>,
    /// Mark this organization as current and reveal it.
    #[arg(long, value_name = "ID")]
    show: Option<String>,
    /// Emit JSON instead of an indented outline.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    input: PathBuf,
    /// Organization to describe.
    org: String,
    #[command(flatten)]
    selection: SelectionArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    input: PathBuf,
    #[command(flatten)]
    selection: SelectionArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RecipientsArgs {
    input: PathBuf,
    #[command(flatten)]
    selection: SelectionArgs,
}

#[derive(Debug, Args)]
struct SubtreeArgs {
    input: PathBuf,
    /// Organization whose subtree is printed.
    org: String,
}

#[derive(Debug, Args)]
struct PersonArgs {
    input: PathBuf,
    /// Email address, matched case-insensitively.
    #[arg(long)]
    email: String,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// JSON array of employee records.
    input: PathBuf,
    /// Key used for the company root id (`company:<ID>`).
    #[arg(long, default_value = "company")]
    company_id: String,
    /// Display name of the company root.
    #[arg(long, default_value = "Company")]
    company_name: String,
    /// Write the tree JSON here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Validate(args) => handle_validate(args),
        Commands::Tree(args) => handle_tree(args),
        Commands::Show(args) => handle_show(args),
        Commands::Summary(args) => handle_summary(args),
        Commands::Recipients(args) => handle_recipients(args),
        Commands::Subtree(args) => handle_subtree(args),
        Commands::Person(args) => handle_person(args),
        Commands::Import(args) => handle_import(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_explorer(input: &Path) -> Result<Explorer> {
    let mut explorer = Explorer::default();
    explorer
        .load(&FileForestSource::new(input))
        .with_context(|| format!("loading {:?}", input))?;
    Ok(explorer)
}

fn resolve_orgs(explorer: &Explorer, raw: &[String]) -> Vec<Identifier> {
    raw.iter()
        .filter_map(|token| {
            let id = explorer.resolve_org_id(token);
            if id.is_none() {
                tracing::warn!(id = %token, "no such organization");
            }
            id
        })
        .collect()
}

fn apply_selection(explorer: &mut Explorer, selection: &SelectionArgs) {
    for id in resolve_orgs(explorer, &selection.select_org) {
        explorer.set_org_selected(&id, true);
    }
    for id in resolve_orgs(explorer, &selection.deselect_org) {
        explorer.set_org_selected(&id, false);
    }
    for token in &selection.select_person {
        match explorer.resolve_person_id(token) {
            Some(id) => explorer.set_person_selected(&id, true),
            None => tracing::warn!(id = %token, "no such person"),
        }
    }
}

fn handle_validate(args: ValidateArgs) -> Result<()> {
    let explorer = open_explorer(&args.input)?;
    let index = explorer.index();
    println!(
        "{}: {} root(s), {} organization(s), {} person(s)",
        args.input.display(),
        index.roots().len(),
        index.len(),
        index.person_count()
    );
    Ok(())
}

fn handle_tree(args: TreeArgs) -> Result<()> {
    let TreeArgs {
        input,
        selection,
        search,
        expand,
        show,
        json,
    } = args;

    let mut explorer = open_explorer(&input)?;
    apply_selection(&mut explorer, &selection);
    for id in resolve_orgs(&explorer, &expand) {
        explorer.toggle_expand(&id);
    }
    if let Some(id) = show.as_deref().and_then(|raw| explorer.resolve_org_id(raw)) {
        explorer.show_organization(&id);
    }
    if let Some(query) = &search {
        explorer.set_search_query(query);
    }

    let view = explorer.tree_view();
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    match view.empty {
        Some(EmptyState::NotLoaded) => eprintln!("No organizations loaded."),
        Some(EmptyState::NoMatches) => {
            eprintln!("No organizations match {:?}.", explorer.search_query())
        }
        None => {}
    }
    for line in render_tree_lines(&view.nodes) {
        println!("{line}");
    }
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<()> {
    let ShowArgs {
        input,
        org,
        selection,
        json,
    } = args;

    let mut explorer = open_explorer(&input)?;
    apply_selection(&mut explorer, &selection);
    let Some(id) = explorer.resolve_org_id(&org) else {
        anyhow::bail!("organization {org} not found in {:?}", input);
    };
    explorer.show_organization(&id);
    let Some(details) = explorer.details() else {
        anyhow::bail!("organization {org} not found in {:?}", input);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }

    println!("{}", details.name);
    println!("{}", details.breadcrumb.join(" / "));
    println!(
        "{} sub-organization(s) · {} member(s)",
        details.descendant_count, details.member_count
    );
    if details.child_names.is_empty() {
        println!("No sub-organizations.");
    } else {
        println!("Sub-organizations:");
        for name in &details.child_names {
            println!("  - {name}");
        }
    }
    if details.people.is_empty() {
        println!("No members registered.");
    } else {
        println!("Members:");
        for row in &details.people {
            let mark = match (row.checked, row.locked) {
                (_, true) => "[=]",
                (true, false) => "[x]",
                (false, false) => "[ ]",
            };
            let title = row.title.as_deref().unwrap_or("(no title)");
            println!("  {mark} {} · {title} · {}", row.name, row.email);
        }
    }
    Ok(())
}

fn handle_summary(args: SummaryArgs) -> Result<()> {
    let SummaryArgs {
        input,
        selection,
        json,
    } = args;

    let mut explorer = open_explorer(&input)?;
    apply_selection(&mut explorer, &selection);
    let summary = explorer.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in render_summary_lines(&summary) {
            println!("{line}");
        }
    }
    Ok(())
}

fn handle_recipients(args: RecipientsArgs) -> Result<()> {
    let mut explorer = open_explorer(&args.input)?;
    apply_selection(&mut explorer, &args.selection);
    println!("{}", serde_json::to_string_pretty(&explorer.recipients())?);
    Ok(())
}

fn handle_subtree(args: SubtreeArgs) -> Result<()> {
    let explorer = open_explorer(&args.input)?;
    let subtree = explorer
        .resolve_org_id(&args.org)
        .and_then(|id| explorer.subtree(&id));
    let Some(subtree) = subtree else {
        anyhow::bail!("organization {} not found in {:?}", args.org, args.input);
    };
    println!("{}", serde_json::to_string_pretty(subtree)?);
    Ok(())
}

fn handle_person(args: PersonArgs) -> Result<()> {
    let explorer = open_explorer(&args.input)?;
    let Some(person) = explorer.person_by_email(&args.email) else {
        anyhow::bail!("no person with email {:?} in {:?}", args.email, args.input);
    };
    println!("{}", serde_json::to_string_pretty(person)?);
    Ok(())
}

fn handle_import(args: ImportArgs) -> Result<()> {
    let ImportArgs {
        input,
        company_id,
        company_name,
        output,
    } = args;

    let text = fs::read_to_string(&input).with_context(|| format!("reading {:?}", input))?;
    let employees: Vec<Employee> =
        serde_json::from_str(&text).with_context(|| format!("decoding employees in {:?}", input))?;
    let json = import_json(
        &employees,
        &CompanyInfo {
            id: company_id,
            name: company_name,
        },
    )?;

    match output {
        Some(path) => {
            fs::write(&path, json.as_bytes()).with_context(|| format!("writing {:?}", path))?;
            println!(
                "Wrote {} employee(s) into {:?}",
                employees.len(),
                path
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn import_json(employees: &[Employee], company: &CompanyInfo) -> Result<String> {
    let forest = directory::build_forest_from_employees(employees, company);
    Ok(serde_json::to_string_pretty(&forest)?)
}

fn render_tree_lines(nodes: &[ViewNode]) -> Vec<String> {
    fn rec(nodes: &[ViewNode], depth: usize, out: &mut Vec<String>) {
        for node in nodes {
            let toggle = match (node.has_children, node.expanded) {
                (false, _) => "•",
                (true, true) => "▾",
                (true, false) => "▸",
            };
            let mark = match node.mark {
                SelectionMark::Checked => "[x]",
                SelectionMark::Indeterminate => "[-]",
                SelectionMark::Unchecked => "[ ]",
            };
            let current = if node.is_current { " <" } else { "" };
            out.push(format!(
                "{:indent$}{toggle} {mark} {} ({}){current}",
                "",
                node.name,
                node.id,
                indent = depth * 2
            ));
            rec(&node.children, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    rec(nodes, 0, &mut out);
    out
}

fn render_summary_lines(summary: &SelectionSummary<'_>) -> Vec<String> {
    let mut out = vec!["Organizations:".to_string()];
    if summary.orgs.is_empty() {
        out.push("  (none selected)".into());
    }
    for org in &summary.orgs {
        out.push(format!("  {} ({})", org.name, org.id));
    }

    out.push("People:".into());
    if summary.people.is_empty() {
        out.push("  (none selected)".into());
    }
    for selected in &summary.people {
        let badge = match (selected.via_org, selected.manual) {
            (true, _) => " [via organization]",
            (false, true) => " [individual]",
            (false, false) => "",
        };
        out.push(format!(
            "  {} <{}>{badge}",
            selected.person.name, selected.person.email
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREST: &str = r#"[
        {"id": 1, "name": "HQ", "people": [], "children": [
            {"id": 2, "name": "Eng", "children": [], "people": [
                {"id": 10, "name": "Alice", "title": null, "email": "a@x.com", "organization_id": 2}
            ]},
            {"id": 3, "name": "Ops", "children": [], "people": [
                {"id": 11, "name": "Bob", "title": "Lead", "email": "b@x.com", "organization_id": 3}
            ]}
        ]}
    ]"#;

    fn write_forest(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("tree.json");
        fs::write(&path, FOREST).expect("write forest");
        path
    }

    fn selection(orgs: &[i64], people: &[i64]) -> SelectionArgs {
        SelectionArgs {
            select_org: orgs.iter().map(i64::to_string).collect(),
            deselect_org: vec![],
            select_person: people.iter().map(i64::to_string).collect(),
        }
    }

    #[test]
    fn tree_lines_show_marks_and_nesting() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut explorer = open_explorer(&write_forest(&tmp)).expect("open");
        apply_selection(&mut explorer, &selection(&[2], &[]));

        let lines = render_tree_lines(&explorer.tree_view().nodes);
        assert_eq!(
            lines,
            vec![
                "▾ [-] HQ (1)".to_string(),
                "  • [x] Eng (2)".to_string(),
                "  • [ ] Ops (3)".to_string(),
            ]
        );
    }

    #[test]
    fn summary_lines_label_provenance() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut explorer = open_explorer(&write_forest(&tmp)).expect("open");
        apply_selection(&mut explorer, &selection(&[2], &[11]));

        let lines = render_summary_lines(&explorer.summary());
        assert_eq!(
            lines,
            vec![
                "Organizations:",
                "  Eng (2)",
                "People:",
                "  Alice <a@x.com> [via organization]",
                "  Bob <b@x.com> [individual]",
            ]
        );
    }

    #[test]
    fn deselect_is_applied_after_select() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut explorer = open_explorer(&write_forest(&tmp)).expect("open");
        let mut args = selection(&[1], &[]);
        args.deselect_org = vec!["3".into()];
        apply_selection(&mut explorer, &args);

        let emails: Vec<String> = explorer.recipients().into_iter().map(|r| r.email).collect();
        // HQ is still selected, so Ops' members stay covered through it.
        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(
            explorer.org_selection_state(&Identifier::Num(3)),
            SelectionMark::Unchecked
        );
    }

    #[test]
    fn open_explorer_reports_missing_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = open_explorer(&tmp.path().join("nope.json")).unwrap_err();
        assert!(format!("{err:#}").contains("nope.json"));
    }

    #[test]
    fn cli_parses_mixed_identifiers() {
        let cli = Cli::try_parse_from([
            "orgchart",
            "summary",
            "tree.json",
            "--select-org",
            "dept:North:ENG",
            "--select-person",
            "42",
        ])
        .expect("parse");
        let Commands::Summary(args) = cli.command else {
            panic!("expected summary command");
        };
        assert_eq!(args.selection.select_org, vec!["dept:North:ENG"]);
        assert_eq!(args.selection.select_person, vec!["42"]);
    }

    #[test]
    fn imported_numeric_employee_ids_are_selectable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let employees: Vec<Employee> = serde_json::from_str(
            r#"[
                {"employee_id": "1001", "name": "Alice", "email": "alice@x.com",
                 "campus": "North", "dept_id": "ENG", "dept_name": "Engineering"},
                {"employee_id": "1002", "name": "Bob", "email": "bob@x.com",
                 "campus": "North", "dept_id": "OPS"}
            ]"#,
        )
        .expect("employees");
        let path = tmp.path().join("imported.json");
        fs::write(&path, import_json(&employees, &CompanyInfo::default()).expect("import"))
            .expect("write tree");

        let mut explorer = open_explorer(&path).expect("open");
        apply_selection(
            &mut explorer,
            &SelectionArgs {
                select_org: vec!["dept:North:OPS".into()],
                deselect_org: vec![],
                select_person: vec!["1001".into()],
            },
        );
        let ids: Vec<Identifier> = explorer.recipients().into_iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![Identifier::Text("1001".into()), Identifier::Text("1002".into())]
        );
    }

    #[test]
    fn unknown_cli_ids_are_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut explorer = open_explorer(&write_forest(&tmp)).expect("open");
        apply_selection(&mut explorer, &selection(&[404], &[405]));
        assert!(explorer.selection().is_empty());
    }

    #[test]
    fn cli_parses_lookup_commands() {
        let cli = Cli::try_parse_from(["orgchart", "person", "tree.json", "--email", "a@x.com"])
            .expect("parse");
        let Commands::Person(args) = cli.command else {
            panic!("expected person command");
        };
        assert_eq!(args.email, "a@x.com");

        let cli = Cli::try_parse_from(["orgchart", "subtree", "tree.json", "2"]).expect("parse");
        let Commands::Subtree(args) = cli.command else {
            panic!("expected subtree command");
        };
        assert_eq!(args.org, "2");
    }
}
