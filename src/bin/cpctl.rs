// cpctl - command line front end for the CP client.
//
// The serial interface can leave the whole process wedged if the device
// stops responding mid-exchange; a watchdog thread arms around every
// device call and terminates the process when no forward progress
// happens within the allotted seconds.

use std::env;
use std::io::Read;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use colored::*;

use cp_client::{
    dispatch, format_grouped_id, ClientConfig, CpRequest, Session, TransportKind,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hang monitor. Armed around each device call; if the countdown reaches
/// zero while armed, the process is assumed wedged and terminated.
struct Watchdog {
    armed: Arc<AtomicBool>,
    remaining: Arc<AtomicI64>,
}

impl Watchdog {
    fn spawn() -> Watchdog {
        let armed = Arc::new(AtomicBool::new(false));
        let remaining = Arc::new(AtomicI64::new(0));
        let armed_thread = armed.clone();
        let remaining_thread = remaining.clone();
        thread::spawn(move || loop {
            thread::sleep(Duration::from_secs(1));
            if armed_thread.load(Ordering::SeqCst)
                && remaining_thread.fetch_sub(1, Ordering::SeqCst) <= 1
            {
                eprintln!("{} device exchange stalled, terminating", "Error:".red().bold());
                process::exit(1);
            }
        });
        Watchdog { armed, remaining }
    }

    fn arm(&self, seconds: i64) {
        self.remaining.store(seconds, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

fn show_usage(program: &str) {
    println!("cpctl v{} - CP crypto processor client", VERSION);
    println!();
    println!("Usage: {} [options]", program);
    println!();
    println!("  -t <path>      device path (serial line)");
    println!("  -u <path>      device path (unix socket daemon)");
    println!("  -c <file>      load JSON configuration file");
    println!("  -k <id>        key index for -p / -j challenge queries (default 0)");
    println!("  -p             print putative ID");
    println!("  -d             print all device info");
    println!("  -a <seconds>   set the wake-up alarm");
    println!("  -s             power the device down");
    println!("  -j             read one JSON request from stdin, write the JSON reply");
    println!("  --help         this screen");
}

struct Options {
    config: ClientConfig,
    key_id: u16,
    print_putative_id: bool,
    print_all: bool,
    alarm: Option<u32>,
    power_down: bool,
    json_mode: bool,
    usage: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        config: ClientConfig::default(),
        key_id: 0,
        print_putative_id: false,
        print_all: false,
        alarm: None,
        power_down: false,
        json_mode: false,
        usage: args.len() <= 1,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-t" => {
                i += 1;
                let path = args.get(i).ok_or("-t requires a device path")?;
                opts.config.device_path = path.clone();
                opts.config.transport = TransportKind::Serial;
            }
            "-u" => {
                i += 1;
                let path = args.get(i).ok_or("-u requires a socket path")?;
                opts.config.device_path = path.clone();
                opts.config.transport = TransportKind::UnixSocket;
            }
            "-c" => {
                i += 1;
                let path = args.get(i).ok_or("-c requires a file path")?;
                opts.config = ClientConfig::load(Path::new(path))
                    .map_err(|err| format!("could not load {}: {}", path, err))?;
            }
            "-k" => {
                i += 1;
                let id = args.get(i).ok_or("-k requires a key index")?;
                opts.key_id = id.parse().map_err(|_| format!("bad key index: {}", id))?;
            }
            "-p" => opts.print_putative_id = true,
            "-d" => opts.print_all = true,
            "-a" => {
                i += 1;
                let secs = args.get(i).ok_or("-a requires seconds")?;
                opts.alarm =
                    Some(secs.parse().map_err(|_| format!("bad alarm time: {}", secs))?);
            }
            "-s" => opts.power_down = true,
            "-j" => opts.json_mode = true,
            "--help" | "--" => opts.usage = true,
            other => eprintln!("{} unrecognized option \"{}\"", "Warning:".yellow(), other),
        }
        i += 1;
    }
    Ok(opts)
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("{} {}", "Error:".red().bold(), message);
            process::exit(1);
        }
    };

    if opts.usage {
        show_usage(&args[0]);
        return;
    }

    let watchdog = Watchdog::spawn();

    watchdog.arm(10);
    let mut session = match Session::open(&opts.config) {
        Ok(session) => session,
        Err(code) => {
            eprintln!("{} session open failed ({})", "Error:".red().bold(), code);
            process::exit(1);
        }
    };
    watchdog.disarm();

    let mut failed = false;

    if opts.json_mode {
        let mut input = String::new();
        if let Err(err) = std::io::stdin().read_to_string(&mut input) {
            eprintln!("{} could not read stdin: {}", "Error:".red().bold(), err);
            process::exit(1);
        }
        match serde_json::from_str::<CpRequest>(&input) {
            Ok(request) => {
                watchdog.arm(10);
                let reply = dispatch(&mut session, &request);
                watchdog.disarm();
                failed = reply.is_error();
                println!("{}", serde_json::to_string_pretty(&reply).unwrap_or_default());
            }
            Err(err) => {
                eprintln!("{} bad request: {}", "Error:".red().bold(), err);
                failed = true;
            }
        }
    }

    if opts.print_putative_id || opts.print_all {
        watchdog.arm(4);
        match session.putative_id(opts.key_id) {
            Ok(id) if opts.print_all => println!("Putative ID : {}", id),
            Ok(id) => println!("{}", id),
            Err(code) => {
                eprintln!("{} putative id query failed ({})", "Error:".red().bold(), code);
                failed = true;
            }
        }
        watchdog.disarm();
    }

    if opts.print_all && !failed {
        failed = print_all_info(&mut session, opts.key_id, &watchdog);
    }

    if let Some(seconds) = opts.alarm {
        watchdog.arm(10);
        match session.set_alarm(seconds) {
            Ok(()) => println!("{} alarm set for {} seconds", "OK:".green(), seconds),
            Err(code) => {
                eprintln!("{} set alarm failed ({})", "Error:".red().bold(), code);
                failed = true;
            }
        }
        watchdog.disarm();
    }

    if opts.power_down && !failed {
        watchdog.arm(10);
        if let Err(code) = session.power_down() {
            eprintln!("{} power down failed ({})", "Error:".red().bold(), code);
            failed = true;
        }
        watchdog.disarm();
    }

    session.shutdown();
    process::exit(if failed { 1 } else { 0 });
}

/// Print every informational field the device exposes, in the order the
/// catalog defines them.
fn print_all_info(session: &mut Session, key_id: u16, watchdog: &Watchdog) -> bool {
    watchdog.arm(10);
    match session.public_key(key_id) {
        // The key blob carries its own line endings.
        Ok(key) => print!("Public Key : \n{}", key),
        Err(code) => {
            eprintln!("{} public key query failed ({})", "Error:".red().bold(), code);
            return true;
        }
    }

    watchdog.arm(4);
    match session.firmware_version() {
        Ok(vers) => println!("Version : {}", vers),
        Err(code) => {
            eprintln!("{} version query failed ({})", "Error:".red().bold(), code);
            return true;
        }
    }

    watchdog.arm(4);
    match session.current_time() {
        Ok(seconds) => println!("Current Time : {} seconds since boot", seconds),
        Err(code) => {
            eprintln!("{} time query failed ({})", "Error:".red().bold(), code);
            return true;
        }
    }

    watchdog.arm(4);
    match session.owner_key_index() {
        Ok(index) => println!("Owner Key Index : {}", index),
        Err(code) => {
            eprintln!("{} owner key index query failed ({})", "Error:".red().bold(), code);
            return true;
        }
    }

    watchdog.arm(4);
    match session.serial_number() {
        Ok(raw) => println!("Serial Number : {}", format_grouped_id(&raw)),
        Err(code) => {
            eprintln!("{} serial number query failed ({})", "Error:".red().bold(), code);
            return true;
        }
    }

    watchdog.arm(4);
    match session.hardware_version() {
        Ok(raw) => println!("Hardware Version : {}", format_grouped_id(&raw)),
        Err(code) => {
            eprintln!("{} hardware version query failed ({})", "Error:".red().bold(), code);
            return true;
        }
    }
    watchdog.disarm();

    false
}
