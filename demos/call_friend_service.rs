//! Calls `FriendService.GetFriendsList` and prints the result.

mod messages;

use std::sync::Arc;

use beacon_rpc::{
    bootstrap, registry, ChannelConfig, Registry, RpcChannel, RpcController, ServiceStub,
};
use messages::{GetFriendsListRequest, GetFriendsListResponse};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = bootstrap::init()?;
    let config = app.config();

    let registry = registry::connect(config).await?;
    let channel = Arc::new(RpcChannel::with_config(registry.clone(), ChannelConfig::from(config)));
    let stub = ServiceStub::new(channel, "FriendService");

    let mut controller = RpcController::new();
    let response: GetFriendsListResponse = stub
        .call("GetFriendsList", &GetFriendsListRequest { id: 1 }, &mut controller)
        .await;

    if controller.failed() {
        println!("rpc call failed! error: {}", controller.error_text());
    } else if response.result.is_ok() {
        println!("rpc call success!");
        println!("friends list:");
        for friend in &response.friends {
            println!("{}", friend);
        }
    } else {
        println!("rpc call failed! error: {}", response.result.errmsg);
    }

    registry.close().await;
    app.shutdown();
    Ok(())
}
