use std::path::PathBuf;
use std::str;
use std::thread;
use std::time;

use structopt::StructOpt;

use dds::chain::{self, Discipline};
use dds::channel::{self, Receiver, Sender};
use dds::paxos::{self, QueueOperation};
use dds::{abd, Reply, Request};

mod command;

use crate::command::{Command, Scenario};

#[derive(Copy, Clone, Debug)]
enum Scheme {
    Abd,
    Queue,
    Broadcast,
    Chain,
}

impl str::FromStr for Scheme {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
        | "abd" => Ok(Scheme::Abd),
        | "queue" => Ok(Scheme::Queue),
        | "broadcast" => Ok(Scheme::Broadcast),
        | "chain" => Ok(Scheme::Chain),
        | unknown => Err(format!("unknown scheme: {}", unknown)),
        }
    }
}

#[derive(StructOpt)]
#[structopt(name = "harness")]
struct Opt {
    /// Replication scheme: abd, queue, broadcast, or chain
    #[structopt(short = "s", long = "scheme")]
    scheme: Scheme,

    /// Total number of replicas
    #[structopt(short = "c", long = "count", default_value = "5")]
    count: usize,

    /// JSON scenario file to replay
    #[structopt(short = "f", long = "file")]
    file: PathBuf,

    /// Logging verbosity (-v for debug, -vv for trace)
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

fn main() {
    let opt = Opt::from_args();
    initialize_logger(opt.verbose);

    let scenario: Scenario = std::fs::File::open(&opt.file)
        .map(serde_json::from_reader)
        .expect("[INTERNAL ERROR]: could not find scenario file")
        .expect("[INTERNAL ERROR]: could not parse scenario");

    match opt.scheme {
    | Scheme::Abd => {
        let cluster = abd::Cluster::new(opt.count);
        let (reply_tx, replies) = channel::fifo();
        let requests = cluster.connect(0, reply_tx);
        drive_registers(&requests, &replies, &scenario);
        for report in cluster.join() {
            println!("replica {} store: {:?}", report.id, report.store);
        }
    }
    | Scheme::Broadcast | Scheme::Chain => {
        let discipline = match opt.scheme {
        | Scheme::Chain => Discipline::Chain,
        | _ => Discipline::Broadcast,
        };
        let cluster = chain::Cluster::new(opt.count, discipline);
        let (reply_tx, replies) = channel::fifo();
        let requests = cluster.connect(0, reply_tx);
        drive_registers(&requests, &replies, &scenario);
        for report in cluster.join() {
            println!("replica {} store: {:?}", report.id, report.store);
        }
    }
    | Scheme::Queue => {
        let cluster = paxos::Cluster::new(opt.count);
        let (reply_tx, replies) = channel::fifo();
        let requests = cluster.connect(0, reply_tx);
        drive_queue(&requests, &replies, &scenario);
        for report in cluster.join() {
            let mut decided: Vec<_> = report.log.iter().collect();
            decided.sort_by_key(|(index, _)| **index);
            println!("replica {} log: {:?}", report.id, decided);
            println!("replica {} queue: {:?}", report.id, report.queue);
        }
    }
    }
}

fn drive_registers(requests: &Sender<Request>, replies: &Receiver<Reply>, scenario: &Scenario) {
    for command in &scenario.0 {
        println!("executing command {:?}", command);
        match command {
        | Command::Write { register, value } => {
            requests.send(Request::Write {
                register: register.clone(),
                value: value.clone(),
            });
            match replies.recv() {
            | Some(Reply::WriteAck) => println!("write {}={} acknowledged", register, value),
            | other => println!("unexpected reply {:?}", other),
            }
        }
        | Command::Read { register } => {
            requests.send(Request::Read { register: register.clone() });
            match replies.recv() {
            | Some(Reply::Value { register, value }) => println!("read {}={:?}", register, value),
            | other => println!("unexpected reply {:?}", other),
            }
        }
        | Command::Sleep { ms } => thread::sleep(time::Duration::from_millis(*ms)),
        | skipped => println!("skipping {:?}: not a register command", skipped),
        }
    }
    requests.send(Request::Stop);
}

fn drive_queue(
    requests: &Sender<paxos::Request>,
    replies: &Receiver<Reply>,
    scenario: &Scenario,
) {
    let mut invocation = 0;
    for command in &scenario.0 {
        println!("executing command {:?}", command);
        match command {
        | Command::Enqueue { value } => {
            invocation += 1;
            requests.send(paxos::Request::Submit(QueueOperation::enqueue(
                0, invocation, *value,
            )));
            println!("enqueue({}) submitted", value);
        }
        | Command::Dequeue => {
            invocation += 1;
            requests.send(paxos::Request::Submit(QueueOperation::dequeue(0, invocation)));
            match replies.recv() {
            | Some(Reply::Dequeued { value }) => println!("dequeued {:?}", value),
            | other => println!("unexpected reply {:?}", other),
            }
        }
        | Command::Sleep { ms } => thread::sleep(time::Duration::from_millis(*ms)),
        | skipped => println!("skipping {:?}: not a queue command", skipped),
        }
    }
    // Let straggling decisions drain before shutting replicas down.
    thread::sleep(time::Duration::from_millis(200));
    requests.send(paxos::Request::Stop);
}

fn initialize_logger(verbose: u8) {
    let level = match verbose {
    | 0 => log::LevelFilter::Info,
    | 1 => log::LevelFilter::Debug,
    | _ => log::LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}][{}] {}", record.level(), record.target(), message))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .expect("[INTERNAL ERROR]: failed to initialize logger");
}
