#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    coach_calendar::run().await
}
