use crate::services::PriceStore;
use crate::utils::get_database_path;

pub async fn run() {
    println!("📊 Cache Status\n");

    match show_status().await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn show_status() -> Result<(), Box<dyn std::error::Error>> {
    let database_path = get_database_path();
    if !database_path.exists() {
        println!("⚠️  No cache database at {}. Run 'serve' and load a chart first.", database_path.display());
        return Ok(());
    }

    let store = PriceStore::open(database_path.clone()).await?;
    let stats = store.stats().await?;

    println!("💾 Database: {}", database_path.display());
    println!("📈 Symbols:  {}", stats.unique_symbols);
    println!("🕯️  Bars:     {}\n", stats.total_bars);

    if !stats.series.is_empty() {
        println!("═══════════════════════════════════════════════════════════");
        for series in &stats.series {
            println!(
                "  {:<8} {:<5} {:>8} bars  ({} → {})",
                series.symbol,
                series.interval,
                series.bar_count,
                series.first_timestamp,
                series.last_timestamp
            );
        }
        println!("═══════════════════════════════════════════════════════════");
    }

    store.close().await;
    Ok(())
}
