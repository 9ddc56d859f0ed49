//! `orchestra doctor` — verify context-store connectivity

use orchestra_core::config::load_config;
use orchestra_store::CxdbClient;

pub fn doctor() -> anyhow::Result<()> {
    let config = load_config(None)?;
    println!("CXDB URL: {}", config.cxdb.url);

    let client = CxdbClient::new(&config.cxdb.url);
    match client.health_check() {
        Ok(()) => {
            println!("CXDB: ok");
            Ok(())
        }
        Err(e) => {
            anyhow::bail!(
                "{e}\n\
                 The context store is required for durable sessions.\n\
                 - Start CXDB and expose its HTTP port (default 9010)\n\
                 - Or point ORCHESTRA_CXDB_URL / cxdb.url at a running instance"
            );
        }
    }
}
