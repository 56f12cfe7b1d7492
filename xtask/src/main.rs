use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "fxfer 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建所有组件 (release)
    Build,
    /// 运行服务器 (开发模式)
    Dev {
        /// 监听端口
        #[arg(short, long, default_value = "2121")]
        port: u16,
        /// 对外提供文件的目录
        #[arg(short, long, default_value = ".")]
        root: String,
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
    },
    /// 打包发布 (tar.gz)
    Dist,
    /// 运行测试
    Test,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => std::path::PathBuf::from(dir)
            .parent()
            .map(std::path::Path::to_path_buf)
            .unwrap_or_default(),
        Err(_) => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev {
            port,
            root,
            log_level,
        } => dev(&sh, port, &root, &log_level)?,
        Commands::Dist => dist(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(sh, "cargo build --release -p fxfer-client -p fxfer-server").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell, port: u16, root: &str, log_level: &str) -> Result<()> {
    println!("🚀 启动开发模式服务器...");
    println!("   端口: {}", port);
    println!("   目录: {}", root);
    println!();
    println!("💡 提示: 在另一个终端运行以下命令下载文件:");
    println!("   cargo run -p fxfer-client -- 127.0.0.1 {} <FILE>", port);
    println!();

    let port = port.to_string();
    cmd!(
        sh,
        "cargo run -p fxfer-server -- {port} --root {root} --log-level {log_level}"
    )
    .run()?;
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");

    build(sh)?;

    let version = env!("CARGO_PKG_VERSION");
    let dist_name = format!("fxfer-{}-linux-x86_64", version);

    cmd!(sh, "mkdir -p dist/{dist_name}").run()?;
    cmd!(sh, "cp target/release/fxfer dist/{dist_name}/").run()?;
    cmd!(sh, "cp target/release/fxfer-server dist/{dist_name}/").run()?;
    if sh.path_exists("README.md") {
        cmd!(sh, "cp README.md dist/{dist_name}/").run()?;
    }

    sh.change_dir("dist");
    cmd!(sh, "tar -czvf {dist_name}.tar.gz {dist_name}").run()?;

    println!("✅ 打包完成: dist/{}.tar.gz", dist_name);
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    println!("🔍 分析中...");
    cmd!(
        sh,
        "cargo tarpaulin --packages fxfer-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    sh.remove_path("dist")?;
    println!("✅ 清理完成");
    Ok(())
}
