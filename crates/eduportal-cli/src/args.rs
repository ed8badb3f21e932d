use clap::{Parser, Subcommand};

/// eduportal - admin client for the educational platform
#[derive(Parser, Debug)]
#[command(name = "eduportal")]
#[command(version)]
#[command(about = "Command-line client for the eduportal admin backend", long_about = None)]
pub struct Cli {
    /// Backend base URL (overrides config and EDUPORTAL_API_URL)
    #[arg(long = "api-url", global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and save the session
    Login {
        #[arg(long)]
        email: Option<String>,

        /// Check the credentials without saving the session; it ends when
        /// this command exits
        #[arg(long = "no-remember")]
        no_remember: bool,
    },

    /// End the session here and on the backend
    Logout,

    /// Show the signed-in user's profile
    Whoami,

    /// Register a new account
    Signup {
        #[arg(long)]
        email: String,

        #[arg(long = "first-name")]
        first_name: String,

        #[arg(long = "last-name")]
        last_name: String,

        /// student or teacher
        #[arg(long)]
        role: Option<String>,
    },

    /// Confirm an email address with the token from the verification mail
    VerifyEmail { token: String },

    /// Ask for a password reset email
    ForgotPassword { email: String },

    /// Set a new password using the link's encoded user id and token
    ResetPassword { uid: String, token: String },

    /// Send an authenticated request and print the JSON response
    Call {
        /// HTTP method, e.g. GET or PATCH
        method: String,

        /// Path relative to the API base URL, e.g. users/students/
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },

    /// List students
    Students {
        #[arg(long)]
        search: Option<String>,
    },

    /// List teachers
    Teachers {
        #[arg(long)]
        search: Option<String>,
    },

    /// List pricing plans
    Plans,

    /// List site content sections
    Sections,
}
