use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use shaver_gateway::ChatError;
use shaver_gateway::identity::Identity;
use shaver_types::api::{
    AddMemberRequest, CreateGroupRequest, GroupResponse, InviteCodeResponse, JoinGroupRequest,
};
use shaver_types::roles::Role;

use crate::AppState;

pub async fn create_group(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let group = state.chat.create_group(&identity, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(GroupResponse::for_role(group, Role::Admin)),
    ))
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ChatError> {
    Ok(Json(state.chat.groups_for(identity.user_id).await?))
}

pub async fn get_group(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    Ok(Json(state.chat.group_for_member(identity.user_id, group_id).await?))
}

pub async fn join_group(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<JoinGroupRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let group = state.chat.join(&identity, &req.code).await?;
    Ok((
        StatusCode::CREATED,
        Json(GroupResponse::for_role(group, Role::Member)),
    ))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
) -> Result<StatusCode, ChatError> {
    state.chat.leave(&identity, group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    Ok(Json(state.chat.members(identity.user_id, group_id).await?))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let member = state.chat.add_member(&identity, group_id, &req.username).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ChatError> {
    state.chat.remove_member(&identity, group_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_acting_leader(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ChatError> {
    state.chat.set_acting_leader(&identity, group_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_acting_leader(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ChatError> {
    state.chat.remove_acting_leader(&identity, group_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rotate_invite_code(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    let invite_code = state.chat.rotate_invite_code(&identity, group_id).await?;
    Ok(Json(InviteCodeResponse { invite_code }))
}
