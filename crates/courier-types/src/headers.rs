//! Well-known header keys.
//!
//! These strings are part of the wire contract shared with every other
//! endpoint on the bus and must stay byte-identical.

/// Unique id of the message, preserved across retries and forwarding.
pub const MESSAGE_ID: &str = "NServiceBus.MessageId";

/// Correlation id linking replies to the message that caused them.
pub const CORRELATION_ID: &str = "NServiceBus.CorrelationId";

/// Address replies should be sent to.
pub const REPLY_TO_ADDRESS: &str = "NServiceBus.ReplyToAddress";

/// Semicolon separated list of logical message types in the body.
pub const ENCLOSED_MESSAGE_TYPES: &str = "NServiceBus.EnclosedMessageTypes";

/// MIME type of the serialized body.
pub const CONTENT_TYPE: &str = "NServiceBus.ContentType";

/// Send, publish, reply, subscribe, or unsubscribe.
pub const MESSAGE_INTENT: &str = "NServiceBus.MessageIntent";

/// Wire-formatted UTC time the message was sent.
pub const TIME_SENT: &str = "NServiceBus.TimeSent";

/// Logical endpoint that sent the message.
pub const ORIGINATING_ENDPOINT: &str = "NServiceBus.OriginatingEndpoint";

/// Logical endpoint that processed (or failed to process) the message.
pub const PROCESSING_ENDPOINT: &str = "NServiceBus.ProcessingEndpoint";

/// Marks infrastructure messages that carry no logical body.
pub const CONTROL_MESSAGE: &str = "NServiceBus.ControlMessage";

/// Set on messages whose delivery was deferred through the timeout manager.
pub const IS_DEFERRED_MESSAGE: &str = "NServiceBus.IsDeferredMessage";

// --- Recoverability ---

/// Number of first-level retries performed before the message was given up on.
pub const FIRST_LEVEL_RETRIES: &str = "NServiceBus.FLRetries";

/// Queue the message failed in.
pub const FAILED_QUEUE: &str = "NServiceBus.FailedQ";

/// Wire-formatted UTC time of the failure.
pub const TIME_OF_FAILURE: &str = "NServiceBus.TimeOfFailure";

/// Kind of error that caused the failure.
pub const EXCEPTION_TYPE: &str = "NServiceBus.ExceptionInfo.ExceptionType";

/// Kind of the innermost cause, when there is one.
pub const INNER_EXCEPTION_TYPE: &str = "NServiceBus.ExceptionInfo.InnerExceptionType";

/// Display text of the error.
pub const EXCEPTION_MESSAGE: &str = "NServiceBus.ExceptionInfo.Message";

/// Component the error originated in.
pub const EXCEPTION_SOURCE: &str = "NServiceBus.ExceptionInfo.Source";

/// Full error chain, one cause per line.
pub const EXCEPTION_STACK_TRACE: &str = "NServiceBus.ExceptionInfo.StackTrace";

// --- Timeouts ---

/// Wire-formatted UTC time a deferred message becomes due.
pub const TIMEOUT_EXPIRE: &str = "NServiceBus.Timeout.Expire";

/// Destination an expired timeout is routed to.
pub const TIMEOUT_ROUTE_EXPIRED_TO: &str = "NServiceBus.Timeout.RouteExpiredTimeoutTo";

/// Id of the stored timeout a dispatched message originated from.
pub const RELATED_TO_TIMEOUT_ID: &str = "NServiceBus.RelatedToTimeoutId";

/// Id of the stored timeout the dispatcher satellite should send.
pub const TIMEOUT_ID_TO_DISPATCH: &str = "Timeout.Id";

/// Destination hint carried alongside a dispatch request.
pub const TIMEOUT_DESTINATION: &str = "Timeout.Destination";
