#[tokio::main]
async fn main() {
    match tilegrid_lib::run().await {
        Ok(report) => {
            for round in &report.rounds {
                let status = if round.ok { "solved" } else { "failed" };
                println!("round {}: {} {:?}", round.round, status, round.chosen_indexes);
            }
            println!("session {}: {}/{} rounds solved", report.session_id, report.solved(), report.rounds.len());
        }
        Err(e) => {
            eprintln!("tilegrid: {e}");
            std::process::exit(1);
        }
    }
}
