use anyhow::Result;
use clap::{Parser, Subcommand};
use knot::areas::repository::Repository;
use knot::artifacts::objects::object::hash_object;
use knot::artifacts::objects::object_type::ObjectType;
use knot::artifacts::transfer::server::Daemon;
use knot::commands::plumbing::cat_file::CatFileMode;
use knot::commands::porcelain::clone::{CloneOptions, DEFAULT_REMOTE};
use knot::commands::porcelain::log::LogOptions;
use knot::commands::porcelain::status::StatusFormat;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "knot",
    version = "0.1.0",
    author = "Sami Barbut-Dica",
    about = "A distributed version control system",
    long_about = "knot tracks content-addressed snapshots of a directory tree, \
    merges divergent histories and exchanges them with other repositories.",
    help_template = r"
{name} {version} - {about}

USAGE:
    {usage}

OPTIONS:
    {all-args}
",
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(name = "init", about = "Create an empty repository")]
    Init {
        #[arg(index = 1, help = "Where to create the repository")]
        path: Option<PathBuf>,
        #[arg(long, help = "Create a repository without a working tree")]
        bare: bool,
        #[arg(short = 'b', long = "initial-branch", help = "Name of the first branch")]
        initial_branch: Option<String>,
    },
    #[command(name = "add", about = "Stage file contents")]
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    #[command(name = "rm", about = "Stop tracking files")]
    Rm {
        #[arg(long, help = "Only remove from the index, keeping the working files")]
        cached: bool,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    #[command(name = "reset", about = "Unstage files, restoring their HEAD version in the index")]
    Reset {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    #[command(name = "commit", about = "Record the staged snapshot")]
    Commit {
        #[arg(short, long, help = "The commit message")]
        message: Option<String>,
    },
    #[command(name = "status", about = "Show the working tree status")]
    Status {
        #[arg(long, help = "Machine-readable output")]
        porcelain: bool,
    },
    #[command(name = "log", about = "Show commit history")]
    Log {
        #[arg(long)]
        oneline: bool,
        #[arg(short = 'n', long = "max-count")]
        max_count: Option<usize>,
        #[arg(long, help = "Show branch and tag names next to commits")]
        decorate: bool,
        revisions: Vec<String>,
    },
    #[command(name = "branch", about = "List, create, rename or delete branches")]
    Branch {
        #[arg(short = 'd', long, help = "Delete a fully merged branch")]
        delete: bool,
        #[arg(short = 'D', help = "Delete a branch regardless of its merge status")]
        force_delete: bool,
        #[arg(short = 'm', long = "move", help = "Rename a branch")]
        rename: bool,
        #[arg(short, long)]
        verbose: bool,
        name: Option<String>,
        start_point: Option<String>,
    },
    #[command(name = "checkout", about = "Switch branches or detach HEAD")]
    Checkout {
        #[arg(short = 'b', help = "Create this branch and switch to it")]
        new_branch: Option<String>,
        target: Option<String>,
    },
    #[command(name = "merge", about = "Join another history into the current branch")]
    Merge {
        #[arg(short, long)]
        message: Option<String>,
        target: String,
    },
    #[command(name = "tag", about = "List, create or delete tags")]
    Tag {
        #[arg(short = 'a', long, help = "Create an annotated tag")]
        annotate: bool,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(short = 'd', long)]
        delete: bool,
        #[arg(short, long, help = "Replace an existing tag")]
        force: bool,
        name: Option<String>,
        target: Option<String>,
    },
    #[command(name = "remote", about = "Manage the set of tracked repositories")]
    Remote {
        #[arg(short, long)]
        verbose: bool,
        #[command(subcommand)]
        command: Option<RemoteCommands>,
    },
    #[command(name = "fetch", about = "Download objects and refs from a remote")]
    Fetch {
        #[arg(long, help = "Limit history to this many commits")]
        depth: Option<usize>,
        #[arg(default_value = DEFAULT_REMOTE)]
        remote: String,
    },
    #[command(name = "push", about = "Update remote refs and send their objects")]
    Push {
        #[arg(short, long, help = "Allow non-fast-forward updates")]
        force: bool,
        #[arg(default_value = DEFAULT_REMOTE)]
        remote: String,
        refspecs: Vec<String>,
    },
    #[command(name = "pull", about = "Fetch and merge a remote branch")]
    Pull {
        #[arg(default_value = DEFAULT_REMOTE)]
        remote: String,
        branch: Option<String>,
    },
    #[command(name = "clone", about = "Copy a repository into a new directory")]
    Clone {
        #[arg(long)]
        bare: bool,
        #[arg(short = 'b', long, help = "Check out this branch instead of the remote's HEAD")]
        branch: Option<String>,
        #[arg(long)]
        depth: Option<usize>,
        url: String,
        directory: Option<PathBuf>,
    },
    #[command(name = "ls-remote", about = "List the references of a remote")]
    LsRemote {
        #[arg(default_value = DEFAULT_REMOTE)]
        remote: String,
    },
    #[command(name = "cat-file", about = "Show an object's type, size or content")]
    CatFile {
        #[arg(short = 't', group = "mode")]
        object_type: bool,
        #[arg(short = 's', group = "mode")]
        size: bool,
        #[arg(short = 'p', group = "mode")]
        pretty: bool,
        #[arg(short = 'e', group = "mode", help = "Exit with zero status if the object exists")]
        exists: bool,
        object: String,
    },
    #[command(name = "hash-object", about = "Compute a blob ID, optionally storing the blob")]
    HashObject {
        #[arg(short, long, help = "Write the object to the object database")]
        write: bool,
        file: PathBuf,
    },
    #[command(name = "repack", about = "Pack loose objects")]
    Repack,
    #[command(name = "merge-base", about = "Find best common ancestors")]
    MergeBase {
        #[arg(long)]
        all: bool,
        #[arg(long = "is-ancestor", help = "Exit with zero status if the first commit is an ancestor of the second")]
        is_ancestor: bool,
        first: String,
        second: String,
    },
    #[command(name = "diff-tree", about = "Paths changed between two trees")]
    DiffTree {
        first: String,
        second: Option<String>,
    },
    #[command(name = "daemon", about = "Serve repositories over TCP")]
    Daemon {
        #[arg(long, default_value = "127.0.0.1:9418")]
        listen: String,
        #[arg(long = "base-path", help = "Directory requested paths are resolved against")]
        base_path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RemoteCommands {
    Add { name: String, url: String },
    #[command(alias = "rm")]
    Remove { name: String },
    Rename { old: String, new: String },
    #[command(name = "set-url")]
    SetUrl { name: String, url: String },
}

fn stdout() -> Box<dyn std::io::Write + Send> {
    Box::new(std::io::stdout())
}

fn open_repository() -> Result<Repository> {
    Repository::discover(std::env::current_dir()?, stdout())
}

/// Interpret command-line paths, given relative to the current directory,
/// relative to the work tree
fn work_tree_paths(repository: &Repository, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let pwd = std::env::current_dir()?.canonicalize()?;
    paths
        .iter()
        .map(|path| {
            let absolute = normalize(&pwd.join(path));
            match absolute.strip_prefix(repository.path()) {
                Ok(relative) if relative.as_os_str().is_empty() => Ok(PathBuf::from(".")),
                Ok(relative) => Ok(relative.to_path_buf()),
                Err(_) => anyhow::bail!("'{}' is outside repository", path.display()),
            }
        })
        .collect()
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn clone_destination(url: &str) -> PathBuf {
    let name = url.trim_end_matches('/').rsplit(['/', '\\']).next().unwrap_or(url);
    PathBuf::from(name.strip_suffix(".knot").unwrap_or(name))
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Init { path, bare, initial_branch } => {
            let path = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            let repository = if bare {
                Repository::new_bare(&path, stdout())?
            } else {
                Repository::new(&path, stdout())?
            };
            repository.init(initial_branch.as_deref()).await?;
        }
        Commands::Add { paths } => {
            let repository = open_repository()?;
            let paths = work_tree_paths(&repository, &paths)?;
            repository.add(&paths).await?;
        }
        Commands::Rm { cached, paths } => {
            let repository = open_repository()?;
            let paths = work_tree_paths(&repository, &paths)?;
            repository.remove(&paths, cached).await?;
        }
        Commands::Reset { paths } => {
            let repository = open_repository()?;
            let paths = work_tree_paths(&repository, &paths)?;
            repository.unstage(&paths).await?;
        }
        Commands::Commit { message } => {
            open_repository()?.commit(message.as_deref()).await?;
        }
        Commands::Status { porcelain } => {
            let format = if porcelain { StatusFormat::Porcelain } else { StatusFormat::Long };
            open_repository()?.status(format).await?;
        }
        Commands::Log { oneline, max_count, decorate, revisions } => {
            let options = LogOptions { oneline, max_count, decorate };
            open_repository()?.log(&revisions, &options).await?;
        }
        Commands::Branch { delete, force_delete, rename, verbose, name, start_point } => {
            let repository = open_repository()?;
            match (name, start_point) {
                (Some(name), _) if delete || force_delete => repository.delete_branch(&name, force_delete).await?,
                (Some(old), Some(new)) if rename => repository.rename_branch(&old, &new).await?,
                (Some(new), None) if rename => {
                    let current = repository.head_label();
                    repository.rename_branch(&current, &new).await?
                }
                (Some(name), start_point) => {
                    repository.create_branch(&name, start_point.as_deref()).await?;
                }
                (None, _) if delete || force_delete || rename => anyhow::bail!("branch name required"),
                (None, _) => {
                    repository.list_branches(verbose).await?;
                }
            }
        }
        Commands::Checkout { new_branch, target } => {
            let repository = open_repository()?;
            match (new_branch, target) {
                (Some(name), start_point) => {
                    repository.checkout_new_branch(&name, start_point.as_deref()).await?;
                }
                (None, Some(target)) => {
                    repository.checkout(&target).await?;
                }
                (None, None) => anyhow::bail!("you must specify a branch or commit to check out"),
            }
        }
        Commands::Merge { message, target } => {
            let outcome = open_repository()?.merge(&target, message.as_deref()).await?;
            if outcome.is_conflicted() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Tag { annotate, message, delete, force, name, target } => {
            let repository = open_repository()?;
            match name {
                Some(name) if delete => repository.delete_tag(&name).await?,
                Some(name) => {
                    if annotate && message.is_none() {
                        anyhow::bail!("an annotated tag needs a message (-m)");
                    }
                    repository.create_tag(&name, target.as_deref(), message.as_deref(), force).await?;
                }
                None if delete => anyhow::bail!("tag name required"),
                None => {
                    let mut writer = repository.writer();
                    for tag in repository.list_tags().await? {
                        writeln!(writer, "{tag}")?;
                    }
                }
            }
        }
        Commands::Remote { verbose, command } => {
            let repository = open_repository()?;
            match command {
                None => {
                    repository.list_remotes(verbose).await?;
                }
                Some(RemoteCommands::Add { name, url }) => repository.add_remote(&name, &url).await?,
                Some(RemoteCommands::Remove { name }) => repository.remove_remote(&name).await?,
                Some(RemoteCommands::Rename { old, new }) => repository.rename_remote(&old, &new).await?,
                Some(RemoteCommands::SetUrl { name, url }) => repository.set_remote_url(&name, &url).await?,
            }
        }
        Commands::Fetch { depth, remote } => {
            open_repository()?.fetch(&remote, depth).await?;
        }
        Commands::Push { force, remote, refspecs } => {
            open_repository()?.push(&remote, &refspecs, force).await?;
        }
        Commands::Pull { remote, branch } => {
            let outcome = open_repository()?.pull(&remote, branch.as_deref()).await?;
            if outcome.is_conflicted() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Clone { bare, branch, depth, url, directory } => {
            let destination = directory.unwrap_or_else(|| clone_destination(&url));
            let options = CloneOptions { bare, branch, depth };
            Repository::clone_repository(&url, &destination, &options, stdout()).await?;
        }
        Commands::LsRemote { remote } => {
            open_repository()?.ls_remote(&remote).await?;
        }
        Commands::CatFile { object_type, size, pretty: _, exists, object } => {
            let mode = if object_type {
                CatFileMode::Type
            } else if size {
                CatFileMode::Size
            } else if exists {
                CatFileMode::Exists
            } else {
                CatFileMode::Pretty
            };
            if !open_repository()?.cat_file(&object, mode).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::HashObject { write, file } => {
            let pwd = std::env::current_dir()?;
            let file = pwd.join(file);
            if write {
                open_repository()?.hash_object(&file, true).await?;
            } else {
                // Digesting alone works outside any repository
                let content = std::fs::read(&file)?;
                println!("{}", hash_object(ObjectType::Blob, &content));
            }
        }
        Commands::Repack => {
            open_repository()?.repack().await?;
        }
        Commands::MergeBase { all, is_ancestor, first, second } => {
            let repository = open_repository()?;
            if is_ancestor {
                if !repository.is_ancestor(&first, &second).await? {
                    return Ok(ExitCode::FAILURE);
                }
            } else if repository.merge_base(&first, &second, all).await?.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::DiffTree { first, second } => {
            let repository = open_repository()?;
            match second {
                Some(second) => repository.diff_tree(Some(&first), &second).await?,
                None => repository.diff_tree(None, &first).await?,
            };
        }
        Commands::Daemon { listen, base_path } => {
            let base = match base_path {
                Some(base) => base,
                None => std::env::current_dir()?,
            };
            let daemon = Daemon::bind(listen, base.canonicalize()?).await?;
            println!("listening on {}", daemon.local_addr()?);
            daemon.run().await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("KNOT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("fatal: {error:#}");
            ExitCode::FAILURE
        }
    }
}
