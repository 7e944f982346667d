//! Message type names and field names used by the engine.

/// Client greeting sent once per connection.
pub const CLIENT_HELLO: &str = "ClientHello";
/// Node greeting; no command may be sent before it arrives.
pub const NODE_HELLO: &str = "NodeHello";
/// Sent by the node right before it drops a connection whose name was reused.
pub const CLOSE_CONNECTION_DUPLICATE_CLIENT_NAME: &str = "CloseConnectionDuplicateClientName";
/// Generic request rejection.
pub const PROTOCOL_ERROR: &str = "ProtocolError";
/// The node already tracks a request with the same identifier.
pub const IDENTIFIER_COLLISION: &str = "IdentifierCollision";

/// Fetch request.
pub const CLIENT_GET: &str = "ClientGet";
/// Fetch result carrying the payload.
pub const ALL_DATA: &str = "AllData";
/// Fetch failure, including permanent redirects.
pub const GET_FAILED: &str = "GetFailed";

/// Insert request.
pub const CLIENT_PUT: &str = "ClientPut";
/// Insert completed.
pub const PUT_SUCCESSFUL: &str = "PutSuccessful";
/// Insert failed.
pub const PUT_FAILED: &str = "PutFailed";
/// Final key of an insert became known.
pub const URI_GENERATED: &str = "URIGenerated";
/// Block counters for a running request.
pub const SIMPLE_PROGRESS: &str = "SimpleProgress";

/// Asks the node to verify disk access to a directory.
pub const TEST_DDA_REQUEST: &str = "TestDDARequest";
/// Node challenge naming a file whose content proves read access.
pub const TEST_DDA_REPLY: &str = "TestDDAReply";
/// Client answer to the challenge.
pub const TEST_DDA_RESPONSE: &str = "TestDDAResponse";
/// Node verdict on the directory.
pub const TEST_DDA_COMPLETE: &str = "TestDDAComplete";

/// Subscribes to edition updates of an updatable key.
pub const SUBSCRIBE_USK: &str = "SubscribeUSK";
/// Acknowledges a subscription.
pub const SUBSCRIBED_USK: &str = "SubscribedUSK";
/// Announces a new edition.
pub const SUBSCRIBED_USK_UPDATE: &str = "SubscribedUSKUpdate";
/// Ends a subscription. The node does not answer it.
pub const UNSUBSCRIBE_USK: &str = "UnsubscribeUSK";

/// Requests a fresh SSK key pair.
pub const GENERATE_SSK: &str = "GenerateSSK";
/// Key pair reply.
pub const SSK_KEYPAIR: &str = "SSKKeypair";

/// Correlation token field.
pub const IDENTIFIER_FIELD: &str = "Identifier";
/// Payload length field.
pub const DATA_LENGTH_FIELD: &str = "DataLength";
/// Failure code field.
pub const CODE_FIELD: &str = "Code";
/// Failure description field.
pub const CODE_DESCRIPTION_FIELD: &str = "CodeDescription";
/// Directory field of the disk-access handshake.
pub const DIRECTORY_FIELD: &str = "Directory";
/// Key field.
pub const URI_FIELD: &str = "URI";

/// `GetFailed` code for a permanent redirect.
pub const PERMANENT_REDIRECT_CODE: u32 = 27;
/// `ProtocolError` code demanding the disk-access handshake.
pub const DIRECT_DISK_ACCESS_DENIED_CODE: u32 = 25;
