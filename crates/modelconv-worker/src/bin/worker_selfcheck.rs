use std::path::Path;
use std::process::Command;

use modelconv_blender::check_blender;
use modelconv_worker::config::REQUIRED_VARS;
use modelconv_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    ensure_env_present(&REQUIRED_VARS)?;
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_blender(&config.blender_bin)?;
    ensure_script(&config.blender_script)?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let scratch = tempfile::tempdir_in(path)?;
    scratch.close()?;
    Ok(())
}

fn ensure_blender(program: &str) -> anyhow::Result<()> {
    let path = check_blender(program)?;
    let output = Command::new(&path)
        .args(["--background", "--version"])
        .output()
        .map_err(|e| anyhow::anyhow!("{} not runnable: {}", path.display(), e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} --version failed: {:?}",
            path.display(),
            output.status
        ));
    }
    let version = String::from_utf8_lossy(&output.stdout);
    println!(
        "worker-selfcheck: {}",
        version.lines().next().unwrap_or("blender (unknown version)")
    );
    Ok(())
}

fn ensure_script(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        return Err(anyhow::anyhow!(
            "conversion script not found: {}",
            path.display()
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
