//! The command-line front end (§6): parses arguments, loads the kernel and
//! optional block image, wires the host terminal to the UART, and drives
//! the tick loop until the hart exits (test mode) or the process is
//! interrupted.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use rv_cpu_core::{CpuCore, StepOutcome};
use rv_devices::FileBlockImage;
use rv_jit::JitBackend;

/// A single-hart RV64GC full-system emulator.
#[derive(Debug, Parser)]
#[command(name = "emu", about = "A single-hart RV64GC full-system emulator")]
struct Cli {
    /// Raw binary kernel image, loaded at the RAM base.
    kernel_image: PathBuf,

    /// Raw sector-stream block image backing the virtio-blk device.
    #[arg(long, value_name = "PATH")]
    block_image: Option<PathBuf>,

    /// RAM size in mebibytes.
    #[arg(long, default_value_t = 128)]
    ram_mib: u64,

    /// Intercept `ECALL` as a test-harness exit rather than trapping it
    /// (§4.4 "Test mode", §8 scenario 1). Exit code is 0 iff `x10 == 0`.
    #[arg(long)]
    test_mode: bool,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all logging below errors.
    #[arg(short = 'q', long)]
    quiet: bool,
}

/// Puts stdin into raw mode for the lifetime of the guard and restores the
/// prior terminal settings on drop, including on the unwind path out of a
/// fatal error. Mirrors the save/restore shape of a POSIX `termios`
/// raw-mode console (construct, run, always restore on teardown).
struct RawModeGuard {
    original: libc::termios,
    active: bool,
}

impl RawModeGuard {
    /// No-op (and does not touch `original`) when stdin isn't a terminal,
    /// so piped-input test runs don't fail on `tcgetattr`.
    fn enable() -> Result<Self> {
        // SAFETY: `fd` is a valid, always-open descriptor (stdin) and
        // `termios` is a plain-old-data struct zero-initialized before any
        // ioctl fills it in.
        let fd = libc::STDIN_FILENO;
        if unsafe { libc::isatty(fd) } == 0 {
            return Ok(RawModeGuard { original: unsafe { std::mem::zeroed() }, active: false });
        }

        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
            return Err(io::Error::last_os_error()).context("failed to read terminal settings");
        }

        let mut raw = original;
        unsafe { libc::cfmakeraw(&mut raw) };
        if unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, &raw) } != 0 {
            return Err(io::Error::last_os_error()).context("failed to set raw terminal mode");
        }

        Ok(RawModeGuard { original, active: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSADRAIN, &self.original);
            }
        }
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Spawn the background thread that copies host stdin bytes into a
/// channel the tick loop drains into the UART's RX ring (§10.1 "the
/// background UART input thread"). A dedicated thread is required because
/// stdin reads block and the tick loop must keep advancing the hart.
fn spawn_stdin_reader() -> mpsc::Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut byte = [0u8; 1];
        let mut stdin = io::stdin();
        loop {
            match stdin.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(byte[0]).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli) -> Result<i32> {
    let block_image = match &cli.block_image {
        Some(path) => {
            let image = FileBlockImage::open(path)
                .with_context(|| format!("failed to open block image {}", path.display()))?;
            Some(Box::new(image) as Box<dyn rv_devices::BlockImage + Send>)
        }
        None => None,
    };

    let ram_bytes = (cli.ram_mib as usize) * 1024 * 1024;
    let mut cpu = CpuCore::new(ram_bytes, block_image);
    cpu.emulating_test = cli.test_mode;

    let kernel = std::fs::read(&cli.kernel_image)
        .with_context(|| format!("failed to read kernel image {}", cli.kernel_image.display()))?;
    cpu.load_kernel_image(&kernel);

    log::info!("loaded kernel image: {} bytes, ram: {} MiB", kernel.len(), cli.ram_mib);

    let _raw_mode = RawModeGuard::enable()?;
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
    let stdin_rx = spawn_stdin_reader();

    let mut jit = rv_jit::NoOpJit;
    let mut stdout = io::stdout();

    loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            return Ok(130);
        }

        while let Ok(byte) = stdin_rx.try_recv() {
            cpu.bus.uart.push_rx_byte(byte);
        }

        match jit.translate_unit(&mut cpu) {
            Ok(rv_jit::TranslationOutcome::Completed { end_pc }) => {
                cpu.pc = end_pc;
                continue;
            }
            Ok(rv_jit::TranslationOutcome::NotTranslated) => {}
            Err(err) => {
                eprintln!("{}", rv_debug::fatal_report(&cpu, &format!("jit translation failed: {err}")));
                return Ok(1);
            }
        }

        match cpu.tick(&mut stdout) {
            StepOutcome::Continue | StepOutcome::Idle => {}
            StepOutcome::TestExit(x10) => {
                return Ok(if x10 == 0 { 0 } else { 1 });
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
