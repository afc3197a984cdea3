//! FriendService provider - publishes `FriendService.GetFriendsList`.

mod messages;

use beacon_rpc::{bootstrap, registry, MethodError, ResultCode, RpcProvider, ServiceDescriptor};
use messages::{GetFriendsListRequest, GetFriendsListResponse};
use tracing::info;

async fn get_friends_list(
    request: GetFriendsListRequest,
) -> Result<GetFriendsListResponse, MethodError> {
    info!("doing local service: GetFriendsList (id: {})", request.id);

    Ok(GetFriendsListResponse {
        result: ResultCode::ok(),
        friends: vec![
            "gao yang".to_string(),
            "liu hong".to_string(),
            "wang shuo".to_string(),
        ],
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = bootstrap::init()?;
    let config = app.config();

    let registry = registry::connect(config).await?;
    let friend_service =
        ServiceDescriptor::new("FriendService").method("GetFriendsList", get_friends_list);

    let provider = RpcProvider::builder()
        .config(config)
        .service(friend_service)
        .registry(registry)
        .start(&config.rpc_endpoint().to_string())
        .await?;

    provider.wait_for_shutdown().await?;

    app.shutdown();
    Ok(())
}
